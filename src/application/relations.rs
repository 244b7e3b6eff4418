//! Atomic mutation layer for relationship edges, plus the relation query
//! surface built on the same keys.
//!
//! Every mutation updates its forward set, inverse set, and any denormalized
//! counter inside one fast-store closure; callers can never observe a
//! half-applied pair. Durable persistence, ranking events, and notifications
//! are side effects of a successful state change and their failures are
//! logged, not surfaced.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::application::error::AppError;
use crate::application::notify::{NotificationKind, Notifier};
use crate::application::persistence::PersistenceService;
use crate::application::ranking::RankingEngine;
use crate::application::repos::PostRepo;
use crate::domain::error::DomainError;
use crate::domain::types::{EngagementEvent, PostId, RelationKind, UserId};
use crate::fast::FastStore;
use crate::util::keys;

const SOURCE: &str = "relations";

pub struct RelationService {
    store: Arc<FastStore>,
    ranking: Arc<RankingEngine>,
    persistence: Arc<PersistenceService>,
    posts: Arc<dyn PostRepo>,
    notifier: Arc<dyn Notifier>,
}

impl RelationService {
    pub fn new(
        store: Arc<FastStore>,
        ranking: Arc<RankingEngine>,
        persistence: Arc<PersistenceService>,
        posts: Arc<dyn PostRepo>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            ranking,
            persistence,
            posts,
            notifier,
        }
    }

    // ========================================================================
    // Follow
    // ========================================================================

    /// Returns `true` when the edge was created; following an already
    /// followed user is a no-op returning `false`.
    pub async fn follow(&self, follower: UserId, followed: UserId) -> Result<bool, AppError> {
        if follower == followed {
            return Err(DomainError::validation("cannot follow yourself").into());
        }
        let forward = keys::user_follow(follower);
        let inverse = keys::user_follower(followed);
        let added = self.store.update("follow", |ks| {
            let added = ks.set_mut(&forward).insert(followed.to_string());
            if added {
                ks.set_mut(&inverse).insert(follower.to_string());
            }
            added
        });
        if added {
            counter!("tideline_relation_mutations_total", "kind" => "follow", "op" => "add")
                .increment(1);
            self.write_through(RelationKind::Follow, follower.0, followed.0, true)
                .await;
            self.notify(
                followed,
                NotificationKind::Follow,
                "started following you",
                follower.0,
            );
        }
        Ok(added)
    }

    pub async fn unfollow(&self, follower: UserId, followed: UserId) -> Result<bool, AppError> {
        if follower == followed {
            return Err(DomainError::validation("cannot unfollow yourself").into());
        }
        let forward = keys::user_follow(follower);
        let inverse = keys::user_follower(followed);
        let removed = self.store.update("unfollow", |ks| {
            let removed = ks.set_mut(&forward).remove(&followed.to_string());
            if removed {
                ks.set_mut(&inverse).remove(&follower.to_string());
            }
            ks.prune_if_empty(&forward);
            ks.prune_if_empty(&inverse);
            removed
        });
        if removed {
            counter!("tideline_relation_mutations_total", "kind" => "follow", "op" => "remove")
                .increment(1);
            self.write_through(RelationKind::Follow, follower.0, followed.0, false)
                .await;
        }
        Ok(removed)
    }

    pub fn is_following(&self, follower: UserId, followed: UserId) -> bool {
        self.store
            .sismember(&keys::user_follow(follower), &followed.to_string())
    }

    pub fn following(&self, user: UserId) -> Vec<UserId> {
        parse_ids(self.store.smembers(&keys::user_follow(user)))
    }

    pub fn followers(&self, user: UserId) -> Vec<UserId> {
        parse_ids(self.store.smembers(&keys::user_follower(user)))
    }

    pub fn following_count(&self, user: UserId) -> u64 {
        self.store.scard(&keys::user_follow(user)) as u64
    }

    pub fn follower_count(&self, user: UserId) -> u64 {
        self.store.scard(&keys::user_follower(user)) as u64
    }

    /// Users this user follows who follow back.
    pub fn mutual_following(&self, user: UserId) -> Vec<UserId> {
        parse_ids(
            self.store
                .sinter(&keys::user_follow(user), &keys::user_follower(user)),
        )
    }

    // ========================================================================
    // Like
    // ========================================================================

    pub async fn like(&self, user: UserId, post: PostId) -> Result<bool, AppError> {
        let forward = keys::post_like(post);
        let inverse = keys::user_like(user);
        let count_key = keys::post_like_count(post);
        let added = self.store.update("like", |ks| {
            let added = ks.set_mut(&forward).insert(user.to_string());
            if added {
                ks.set_mut(&inverse).insert(post.to_string());
                ks.counter_add(&count_key, 1);
            }
            added
        });
        if added {
            counter!("tideline_relation_mutations_total", "kind" => "like", "op" => "add")
                .increment(1);
            self.ranking.record_event(post, EngagementEvent::Like);
            self.persistence
                .enqueue(RelationKind::Like, post.0, user.0, true)
                .await;
            self.notify_author(user, post, NotificationKind::Like, "liked your post");
        }
        Ok(added)
    }

    pub async fn unlike(&self, user: UserId, post: PostId) -> Result<bool, AppError> {
        let forward = keys::post_like(post);
        let inverse = keys::user_like(user);
        let count_key = keys::post_like_count(post);
        let removed = self.store.update("unlike", |ks| {
            let removed = ks.set_mut(&forward).remove(&user.to_string());
            if removed {
                ks.set_mut(&inverse).remove(&post.to_string());
                ks.counter_add(&count_key, -1);
            }
            ks.prune_if_empty(&forward);
            ks.prune_if_empty(&inverse);
            removed
        });
        if removed {
            counter!("tideline_relation_mutations_total", "kind" => "like", "op" => "remove")
                .increment(1);
            self.ranking.record_event(post, EngagementEvent::Unlike);
            self.persistence
                .enqueue(RelationKind::Like, post.0, user.0, false)
                .await;
        }
        Ok(removed)
    }

    pub fn is_liked(&self, user: UserId, post: PostId) -> bool {
        self.store
            .sismember(&keys::post_like(post), &user.to_string())
    }

    pub fn likers(&self, post: PostId) -> Vec<UserId> {
        parse_ids(self.store.smembers(&keys::post_like(post)))
    }

    pub fn liked_posts(&self, user: UserId) -> Vec<PostId> {
        parse_ids(self.store.smembers(&keys::user_like(user)))
    }

    /// Denormalized count maintained alongside the membership set; falls back
    /// to the set cardinality when the counter key has never been written.
    pub fn like_count(&self, post: PostId) -> u64 {
        let count_key = keys::post_like_count(post);
        let set_key = keys::post_like(post);
        self.store.read("like_count", |ks| {
            if ks.contains_key(&count_key) {
                ks.counter(&count_key).max(0) as u64
            } else {
                ks.set(&set_key).map(|s| s.len()).unwrap_or(0) as u64
            }
        })
    }

    /// Liked-state lookup for a batch of posts in one snapshot.
    pub fn batch_check_liked(&self, user: UserId, posts: &[PostId]) -> Vec<(PostId, bool)> {
        let member_sets: Vec<String> = posts.iter().map(|p| keys::post_like(*p)).collect();
        let user_member = user.to_string();
        self.store.read("batch_check_liked", |ks| {
            posts
                .iter()
                .zip(&member_sets)
                .map(|(post, key)| {
                    let liked = ks.set(key).is_some_and(|s| s.contains(&user_member));
                    (*post, liked)
                })
                .collect()
        })
    }

    // ========================================================================
    // Favorite
    // ========================================================================

    pub async fn favorite(&self, user: UserId, post: PostId) -> Result<bool, AppError> {
        let forward = keys::user_favorite(user);
        let inverse = keys::post_favorited_by(post);
        let count_key = keys::post_favorite_count(post);
        let added = self.store.update("favorite", |ks| {
            let added = ks.set_mut(&forward).insert(post.to_string());
            if added {
                ks.set_mut(&inverse).insert(user.to_string());
                ks.counter_add(&count_key, 1);
            }
            added
        });
        if added {
            counter!("tideline_relation_mutations_total", "kind" => "favorite", "op" => "add")
                .increment(1);
            self.ranking.record_event(post, EngagementEvent::Favorite);
            self.persistence
                .enqueue(RelationKind::Favorite, user.0, post.0, true)
                .await;
        }
        Ok(added)
    }

    pub async fn unfavorite(&self, user: UserId, post: PostId) -> Result<bool, AppError> {
        let forward = keys::user_favorite(user);
        let inverse = keys::post_favorited_by(post);
        let count_key = keys::post_favorite_count(post);
        let removed = self.store.update("unfavorite", |ks| {
            let removed = ks.set_mut(&forward).remove(&post.to_string());
            if removed {
                ks.set_mut(&inverse).remove(&user.to_string());
                ks.counter_add(&count_key, -1);
            }
            ks.prune_if_empty(&forward);
            ks.prune_if_empty(&inverse);
            removed
        });
        if removed {
            counter!("tideline_relation_mutations_total", "kind" => "favorite", "op" => "remove")
                .increment(1);
            self.ranking.record_event(post, EngagementEvent::Unfavorite);
            self.persistence
                .enqueue(RelationKind::Favorite, user.0, post.0, false)
                .await;
        }
        Ok(removed)
    }

    pub fn is_favorited(&self, user: UserId, post: PostId) -> bool {
        self.store
            .sismember(&keys::user_favorite(user), &post.to_string())
    }

    pub fn favorites(&self, user: UserId) -> Vec<PostId> {
        parse_ids(self.store.smembers(&keys::user_favorite(user)))
    }

    pub fn favorite_count(&self, post: PostId) -> u64 {
        let count_key = keys::post_favorite_count(post);
        let set_key = keys::post_favorited_by(post);
        self.store.read("favorite_count", |ks| {
            if ks.contains_key(&count_key) {
                ks.counter(&count_key).max(0) as u64
            } else {
                ks.set(&set_key).map(|s| s.len()).unwrap_or(0) as u64
            }
        })
    }

    // ========================================================================
    // Block
    // ========================================================================

    pub async fn block(&self, user: UserId, other: UserId) -> Result<bool, AppError> {
        if user == other {
            return Err(DomainError::validation("cannot block yourself").into());
        }
        let forward = keys::user_blacklist(user);
        let inverse = keys::user_blocked_by(other);
        let added = self.store.update("block", |ks| {
            let added = ks.set_mut(&forward).insert(other.to_string());
            if added {
                ks.set_mut(&inverse).insert(user.to_string());
            }
            added
        });
        if added {
            counter!("tideline_relation_mutations_total", "kind" => "block", "op" => "add")
                .increment(1);
            self.write_through(RelationKind::Block, user.0, other.0, true)
                .await;
        }
        Ok(added)
    }

    pub async fn unblock(&self, user: UserId, other: UserId) -> Result<bool, AppError> {
        if user == other {
            return Err(DomainError::validation("cannot unblock yourself").into());
        }
        let forward = keys::user_blacklist(user);
        let inverse = keys::user_blocked_by(other);
        let removed = self.store.update("unblock", |ks| {
            let removed = ks.set_mut(&forward).remove(&other.to_string());
            if removed {
                ks.set_mut(&inverse).remove(&user.to_string());
            }
            ks.prune_if_empty(&forward);
            ks.prune_if_empty(&inverse);
            removed
        });
        if removed {
            counter!("tideline_relation_mutations_total", "kind" => "block", "op" => "remove")
                .increment(1);
            self.write_through(RelationKind::Block, user.0, other.0, false)
                .await;
        }
        Ok(removed)
    }

    pub fn is_blocked(&self, user: UserId, other: UserId) -> bool {
        self.store
            .sismember(&keys::user_blacklist(user), &other.to_string())
    }

    pub fn blacklist(&self, user: UserId) -> Vec<UserId> {
        parse_ids(self.store.smembers(&keys::user_blacklist(user)))
    }

    /// Drop candidates with a block in either direction relative to `viewer`,
    /// preserving order. Evaluated against one snapshot.
    pub fn filter_blocked(&self, viewer: UserId, candidates: &[UserId]) -> Vec<UserId> {
        let blacklist = keys::user_blacklist(viewer);
        let blocked_by = keys::user_blocked_by(viewer);
        self.store.read("filter_blocked", |ks| {
            candidates
                .iter()
                .copied()
                .filter(|candidate| {
                    let member = candidate.to_string();
                    let blocked = ks.set(&blacklist).is_some_and(|s| s.contains(&member))
                        || ks.set(&blocked_by).is_some_and(|s| s.contains(&member));
                    !blocked
                })
                .collect()
        })
    }

    // ========================================================================
    // Side effects
    // ========================================================================

    async fn write_through(&self, kind: RelationKind, subject: i64, object: i64, present: bool) {
        if let Err(error) = self
            .persistence
            .write_through(kind, subject, object, present)
            .await
        {
            warn!(
                kind = kind.as_str(),
                subject,
                object,
                present,
                %error,
                target_module = SOURCE,
                "Write-through persistence failed; reconciliation will repair"
            );
        }
    }

    fn notify(&self, recipient: UserId, kind: NotificationKind, message: &'static str, ref_id: i64) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(recipient, kind, message, ref_id).await;
        });
    }

    /// Notify the post author, skipping self-engagement.
    fn notify_author(
        &self,
        actor: UserId,
        post: PostId,
        kind: NotificationKind,
        message: &'static str,
    ) {
        let notifier = Arc::clone(&self.notifier);
        let posts = Arc::clone(&self.posts);
        tokio::spawn(async move {
            match posts.author_of(post).await {
                Ok(Some(author)) if author != actor => {
                    notifier.notify(author, kind, message, post.0).await;
                }
                Ok(_) => {}
                Err(error) => {
                    debug!(post = %post, %error, target_module = SOURCE, "Skipped notification");
                }
            }
        });
    }
}

fn parse_ids<T: From<i64>>(members: Vec<String>) -> Vec<T> {
    let mut ids: Vec<i64> = members
        .into_iter()
        .filter_map(|member| member.parse().ok())
        .collect();
    ids.sort_unstable();
    ids.into_iter().map(T::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::notify::NoopNotifier;
    use crate::application::repos::memory::MemoryRepos;
    use crate::config::WriteBehindSettings;
    use crate::domain::types::{Dimension, Period};

    struct Harness {
        store: Arc<FastStore>,
        repo: Arc<MemoryRepos>,
        ranking: Arc<RankingEngine>,
        persistence: Arc<PersistenceService>,
        relations: RelationService,
    }

    fn harness() -> Harness {
        let store = Arc::new(FastStore::new());
        let repo = Arc::new(MemoryRepos::new());
        let ranking = Arc::new(RankingEngine::new(Arc::clone(&store)));
        let persistence = Arc::new(PersistenceService::new(
            Arc::clone(&repo) as Arc<dyn crate::application::repos::RelationRepo>,
            WriteBehindSettings {
                flush_delay_secs: 30,
                batch_threshold: 100,
            },
        ));
        let relations = RelationService::new(
            Arc::clone(&store),
            Arc::clone(&ranking),
            Arc::clone(&persistence),
            Arc::clone(&repo) as Arc<dyn PostRepo>,
            Arc::new(NoopNotifier),
        );
        Harness {
            store,
            repo,
            ranking,
            persistence,
            relations,
        }
    }

    #[tokio::test]
    async fn follow_updates_both_indices_and_writes_through() {
        let h = harness();
        assert!(h.relations.follow(UserId(1), UserId(2)).await.unwrap());
        assert!(!h.relations.follow(UserId(1), UserId(2)).await.unwrap());

        assert!(h.relations.is_following(UserId(1), UserId(2)));
        assert_eq!(h.relations.followers(UserId(2)), vec![UserId(1)]);
        assert_eq!(h.relations.following_count(UserId(1)), 1);
        assert_eq!(h.repo.pairs(RelationKind::Follow), vec![(1, 2)]);

        assert!(h.relations.unfollow(UserId(1), UserId(2)).await.unwrap());
        assert!(!h.relations.is_following(UserId(1), UserId(2)));
        assert!(h.relations.followers(UserId(2)).is_empty());
        assert!(h.repo.pairs(RelationKind::Follow).is_empty());
    }

    #[tokio::test]
    async fn self_relation_is_rejected_without_state_change() {
        let h = harness();
        let err = h.relations.follow(UserId(5), UserId(5)).await.unwrap_err();
        assert!(err.is_caller_fault());
        let err = h.relations.block(UserId(5), UserId(5)).await.unwrap_err();
        assert!(err.is_caller_fault());

        assert_eq!(h.relations.following_count(UserId(5)), 0);
        assert!(h.relations.blacklist(UserId(5)).is_empty());
        assert!(h.store.read("empty_check", |ks| ks.is_empty()));
    }

    #[tokio::test]
    async fn like_maintains_counter_and_ranking() {
        let h = harness();
        assert!(h.relations.like(UserId(1), PostId(9)).await.unwrap());
        assert!(h.relations.like(UserId(2), PostId(9)).await.unwrap());
        assert!(!h.relations.like(UserId(2), PostId(9)).await.unwrap());

        assert_eq!(h.relations.like_count(PostId(9)), 2);
        assert_eq!(h.relations.likers(PostId(9)), vec![UserId(1), UserId(2)]);
        assert_eq!(h.relations.liked_posts(UserId(1)), vec![PostId(9)]);
        assert_eq!(h.ranking.dimension_count(PostId(9), Dimension::Likes), 2);

        assert!(h.relations.unlike(UserId(1), PostId(9)).await.unwrap());
        assert_eq!(h.relations.like_count(PostId(9)), 1);
        let score = h.ranking.hot_score(PostId(9), Period::Daily).unwrap();
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn like_goes_through_the_write_behind_buffer() {
        let h = harness();
        h.relations.like(UserId(1), PostId(3)).await.unwrap();
        assert!(h.repo.pairs(RelationKind::Like).is_empty());
        assert_eq!(h.persistence.buffered(), 1);

        h.persistence.flush().await.unwrap();
        assert_eq!(h.repo.pairs(RelationKind::Like), vec![(3, 1)]);
    }

    #[tokio::test]
    async fn favorite_round_trip() {
        let h = harness();
        assert!(h.relations.favorite(UserId(4), PostId(8)).await.unwrap());
        assert!(h.relations.is_favorited(UserId(4), PostId(8)));
        assert_eq!(h.relations.favorites(UserId(4)), vec![PostId(8)]);
        assert_eq!(h.relations.favorite_count(PostId(8)), 1);

        assert!(h.relations.unfavorite(UserId(4), PostId(8)).await.unwrap());
        assert_eq!(h.relations.favorite_count(PostId(8)), 0);
    }

    #[tokio::test]
    async fn block_is_bidirectionally_visible_to_filter() {
        let h = harness();
        h.relations.block(UserId(1), UserId(2)).await.unwrap();
        h.relations.block(UserId(3), UserId(1)).await.unwrap();

        assert!(h.relations.is_blocked(UserId(1), UserId(2)));
        assert_eq!(h.repo.pairs(RelationKind::Block), vec![(1, 2), (3, 1)]);

        let visible = h
            .relations
            .filter_blocked(UserId(1), &[UserId(2), UserId(3), UserId(4)]);
        assert_eq!(visible, vec![UserId(4)]);

        h.relations.unblock(UserId(1), UserId(2)).await.unwrap();
        let visible = h
            .relations
            .filter_blocked(UserId(1), &[UserId(2), UserId(3), UserId(4)]);
        assert_eq!(visible, vec![UserId(2), UserId(4)]);
    }

    #[tokio::test]
    async fn durable_failure_does_not_roll_back_fast_state() {
        let h = harness();
        h.repo.set_fail_writes(true);
        assert!(h.relations.follow(UserId(1), UserId(2)).await.unwrap());
        assert!(h.relations.is_following(UserId(1), UserId(2)));
        assert!(h.repo.pairs(RelationKind::Follow).is_empty());
    }

    #[tokio::test]
    async fn mutual_following_is_the_intersection() {
        let h = harness();
        h.relations.follow(UserId(1), UserId(2)).await.unwrap();
        h.relations.follow(UserId(1), UserId(3)).await.unwrap();
        h.relations.follow(UserId(2), UserId(1)).await.unwrap();

        assert_eq!(h.relations.mutual_following(UserId(1)), vec![UserId(2)]);
    }

    #[tokio::test]
    async fn batch_check_liked_preserves_order() {
        let h = harness();
        h.relations.like(UserId(1), PostId(10)).await.unwrap();
        h.relations.like(UserId(1), PostId(30)).await.unwrap();

        let checked = h
            .relations
            .batch_check_liked(UserId(1), &[PostId(30), PostId(20), PostId(10)]);
        assert_eq!(
            checked,
            vec![(PostId(30), true), (PostId(20), false), (PostId(10), true)]
        );
    }
}
