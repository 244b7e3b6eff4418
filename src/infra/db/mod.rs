//! Postgres-backed repository implementations.

mod posts;
mod relations;

use std::sync::Arc;

use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::domain::types::RelationKind;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

/// Table and column names for one relation kind. The subject column matches
/// the fast-store scope identifier for that kind.
pub(crate) struct RelationTable {
    pub table: &'static str,
    pub subject: &'static str,
    pub object: &'static str,
}

pub(crate) fn relation_table(kind: RelationKind) -> RelationTable {
    match kind {
        RelationKind::Follow => RelationTable {
            table: "user_follows",
            subject: "follower_id",
            object: "followed_id",
        },
        RelationKind::Like => RelationTable {
            table: "post_likes",
            subject: "post_id",
            object: "user_id",
        },
        RelationKind::Favorite => RelationTable {
            table: "post_favorites",
            subject: "user_id",
            object: "post_id",
        },
        RelationKind::Block => RelationTable {
            table: "user_blocks",
            subject: "user_id",
            object: "blocked_id",
        },
    }
}
