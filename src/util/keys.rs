//! Fast-store key layout.
//!
//! Every key in the keyspace is produced here, so the structure kind behind a
//! given prefix is fixed in one place.

use uuid::Uuid;

use crate::domain::types::{Dimension, Period, PostId, RelationKind, UserId};

// Relationship membership sets (forward / inverse pairs).
pub fn user_follow(user: UserId) -> String {
    format!("user:follow:{user}")
}

pub fn user_follower(user: UserId) -> String {
    format!("user:follower:{user}")
}

pub fn post_like(post: PostId) -> String {
    format!("post:like:{post}")
}

pub fn user_like(user: UserId) -> String {
    format!("user:like:{user}")
}

pub fn user_favorite(user: UserId) -> String {
    format!("user:favorite:{user}")
}

pub fn post_favorited_by(post: PostId) -> String {
    format!("post:favorited_by:{post}")
}

pub fn user_blacklist(user: UserId) -> String {
    format!("user:blacklist:{user}")
}

pub fn user_blocked_by(user: UserId) -> String {
    format!("user:blocked_by:{user}")
}

// Denormalized counters.
pub fn post_like_count(post: PostId) -> String {
    format!("post:like_count:{post}")
}

pub fn post_favorite_count(post: PostId) -> String {
    format!("post:favorite_count:{post}")
}

/// Forward set for a reconciliation scope: the fast-store set whose members
/// are compared against the durable relation table.
pub fn relation_scope(kind: RelationKind, scope: i64) -> String {
    match kind {
        RelationKind::Follow => user_follow(UserId(scope)),
        RelationKind::Like => post_like(PostId(scope)),
        RelationKind::Favorite => user_favorite(UserId(scope)),
        RelationKind::Block => user_blacklist(UserId(scope)),
    }
}

// Ranking.
pub fn ranking_dimension(dim: Dimension) -> String {
    format!("post:ranking:{dim}")
}

pub fn ranking_hot(period: Period) -> String {
    format!("post:ranking:hot:{period}")
}

// Timelines.
pub fn timeline_author(author: UserId) -> String {
    format!("timeline:posts:user:{author}")
}

pub fn timeline_global() -> String {
    "timeline:posts:global".to_string()
}

/// Call-unique aggregate key for one `my_feed` evaluation. The UUID suffix
/// keeps concurrent reads for the same viewer from colliding.
pub fn timeline_feed_scratch(viewer: UserId) -> String {
    format!("timeline:posts:my:{viewer}:{}", Uuid::new_v4())
}

// Browse history.
pub fn browse_history(user: UserId) -> String {
    format!("browse:history:user:{user}")
}

// Queues.
pub fn delay_queue(name: &str) -> String {
    format!("delay:queue:{name}")
}

pub fn fifo_queue(name: &str) -> String {
    format!("queue:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_key_matches_per_kind_layout() {
        assert_eq!(
            relation_scope(RelationKind::Follow, 7),
            "user:follow:7"
        );
        assert_eq!(relation_scope(RelationKind::Like, 9), "post:like:9");
        assert_eq!(
            relation_scope(RelationKind::Favorite, 7),
            "user:favorite:7"
        );
        assert_eq!(relation_scope(RelationKind::Block, 7), "user:blacklist:7");
    }

    #[test]
    fn feed_scratch_keys_are_call_unique() {
        let a = timeline_feed_scratch(UserId(1));
        let b = timeline_feed_scratch(UserId(1));
        assert_ne!(a, b);
        assert!(a.starts_with("timeline:posts:my:1:"));
    }
}
