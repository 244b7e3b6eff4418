//! Post author lookups and durable browse-history rows.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::application::repos::{HistoryRepo, PostRepo, RepoError};
use crate::domain::types::{PostId, UserId};

use super::PostgresRepositories;

#[async_trait]
impl PostRepo for PostgresRepositories {
    async fn author_of(&self, post: PostId) -> Result<Option<UserId>, RepoError> {
        let author: Option<i64> =
            sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1")
                .bind(post.0)
                .fetch_optional(self.pool())
                .await?;
        Ok(author.map(UserId))
    }

    async fn authors_of(&self, posts: &[PostId]) -> Result<HashMap<PostId, UserId>, RepoError> {
        if posts.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = posts.iter().map(|post| post.0).collect();
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, author_id FROM posts WHERE id = ANY($1)")
                .bind(&ids)
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(post, author)| (PostId(post), UserId(author)))
            .collect())
    }

    async fn recent_by_author(
        &self,
        author: UserId,
        limit: i64,
    ) -> Result<Vec<(PostId, i64)>, RepoError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, published_at FROM posts \
             WHERE author_id = $1 ORDER BY published_at DESC LIMIT $2",
        )
        .bind(author.0)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(post, published_at)| (PostId(post), published_at))
            .collect())
    }
}

#[async_trait]
impl HistoryRepo for PostgresRepositories {
    async fn record(&self, user: UserId, post: PostId, viewed_at: i64) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO browse_history (user_id, post_id, viewed_at) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, post_id) DO UPDATE SET viewed_at = EXCLUDED.viewed_at",
        )
        .bind(user.0)
        .bind(post.0)
        .bind(viewed_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn recent_excluding(
        &self,
        user: UserId,
        exclude: &[PostId],
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PostId>, RepoError> {
        let excluded: Vec<i64> = exclude.iter().map(|post| post.0).collect();
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT post_id FROM browse_history \
             WHERE user_id = $1 AND NOT (post_id = ANY($2)) \
             ORDER BY viewed_at DESC OFFSET $3 LIMIT $4",
        )
        .bind(user.0)
        .bind(&excluded)
        .bind(offset)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(PostId).collect())
    }

    async fn remove(&self, user: UserId, post: PostId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM browse_history WHERE user_id = $1 AND post_id = $2")
            .bind(user.0)
            .bind(post.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn clear(&self, user: UserId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM browse_history WHERE user_id = $1")
            .bind(user.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
