//! Relation rows, one table per kind, addressed through the shared
//! `(subject, object)` contract.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::QueryBuilder;

use crate::application::repos::{RelationRepo, RepoError};
use crate::domain::types::RelationKind;

use super::{PostgresRepositories, relation_table};

#[async_trait]
impl RelationRepo for PostgresRepositories {
    async fn exists(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
    ) -> Result<bool, RepoError> {
        let t = relation_table(kind);
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1 AND {} = $2)",
            t.table, t.subject, t.object
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(subject)
            .bind(object)
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }

    async fn insert(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
    ) -> Result<(), RepoError> {
        let t = relation_table(kind);
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            t.table, t.subject, t.object
        );
        sqlx::query(&sql)
            .bind(subject)
            .bind(object)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
    ) -> Result<(), RepoError> {
        let t = relation_table(kind);
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            t.table, t.subject, t.object
        );
        sqlx::query(&sql)
            .bind(subject)
            .bind(object)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn align(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
        present: bool,
    ) -> Result<(), RepoError> {
        let t = relation_table(kind);
        let mut tx = self.pool().begin().await?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1 AND {} = $2)",
            t.table, t.subject, t.object
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(subject)
            .bind(object)
            .fetch_one(&mut *tx)
            .await?;
        match (present, exists) {
            (true, false) => {
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                    t.table, t.subject, t.object
                );
                sqlx::query(&sql)
                    .bind(subject)
                    .bind(object)
                    .execute(&mut *tx)
                    .await?;
            }
            (false, true) => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} = $1 AND {} = $2",
                    t.table, t.subject, t.object
                );
                sqlx::query(&sql)
                    .bind(subject)
                    .bind(object)
                    .execute(&mut *tx)
                    .await?;
            }
            _ => {}
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_batch(
        &self,
        kind: RelationKind,
        pairs: &[(i64, i64)],
    ) -> Result<u64, RepoError> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let t = relation_table(kind);
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}, {}) ",
            t.table, t.subject, t.object
        ));
        qb.push_values(pairs, |mut row, (subject, object)| {
            row.push_bind(subject).push_bind(object);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let result = qb.build().execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    async fn delete_batch(
        &self,
        kind: RelationKind,
        pairs: &[(i64, i64)],
    ) -> Result<u64, RepoError> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let t = relation_table(kind);
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "DELETE FROM {} WHERE ({}, {}) IN ",
            t.table, t.subject, t.object
        ));
        qb.push_tuples(pairs, |mut row, (subject, object)| {
            row.push_bind(subject).push_bind(object);
        });
        let result = qb.build().execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    async fn existing_pairs(
        &self,
        kind: RelationKind,
        pairs: &[(i64, i64)],
    ) -> Result<HashSet<(i64, i64)>, RepoError> {
        if pairs.is_empty() {
            return Ok(HashSet::new());
        }
        let t = relation_table(kind);
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT {}, {} FROM {} WHERE ({}, {}) IN ",
            t.subject, t.object, t.table, t.subject, t.object
        ));
        qb.push_tuples(pairs, |mut row, (subject, object)| {
            row.push_bind(subject).push_bind(object);
        });
        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(self.pool()).await?;
        Ok(rows.into_iter().collect())
    }

    async fn objects_of(&self, kind: RelationKind, subject: i64) -> Result<Vec<i64>, RepoError> {
        let t = relation_table(kind);
        let sql = format!("SELECT {} FROM {} WHERE {} = $1", t.object, t.table, t.subject);
        let objects: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(subject)
            .fetch_all(self.pool())
            .await?;
        Ok(objects)
    }

    async fn subjects_page(
        &self,
        kind: RelationKind,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<i64>, RepoError> {
        let t = relation_table(kind);
        let sql = format!(
            "SELECT DISTINCT {} FROM {} ORDER BY {} OFFSET $1 LIMIT $2",
            t.subject, t.table, t.subject
        );
        let subjects: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(offset)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(subjects)
    }
}
