//! Durable-store contracts.
//!
//! The application layer never talks to Postgres directly; it goes through
//! these traits so persistence policies and reconciliation can be exercised
//! against an in-memory implementation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::{PostId, RelationKind, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Relation rows keyed by `(subject, object)` within a kind.
///
/// The subject is the scope identifier the fast store keys its forward set
/// by: the follower for follows, the post for likes, the user for favorites
/// and blocks.
#[async_trait]
pub trait RelationRepo: Send + Sync {
    async fn exists(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
    ) -> Result<bool, RepoError>;

    async fn insert(&self, kind: RelationKind, subject: i64, object: i64)
    -> Result<(), RepoError>;

    async fn delete(&self, kind: RelationKind, subject: i64, object: i64)
    -> Result<(), RepoError>;

    /// Match the durable row for `(subject, object)` to `present`, running
    /// the existence check and the write in one transaction.
    async fn align(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
        present: bool,
    ) -> Result<(), RepoError>;

    /// Insert pairs that are not already present; returns the number written.
    async fn insert_batch(
        &self,
        kind: RelationKind,
        pairs: &[(i64, i64)],
    ) -> Result<u64, RepoError>;

    /// Delete pairs; returns the number removed.
    async fn delete_batch(
        &self,
        kind: RelationKind,
        pairs: &[(i64, i64)],
    ) -> Result<u64, RepoError>;

    /// Which of the given pairs already have a durable row.
    async fn existing_pairs(
        &self,
        kind: RelationKind,
        pairs: &[(i64, i64)],
    ) -> Result<HashSet<(i64, i64)>, RepoError>;

    /// All objects related to `subject` under `kind`.
    async fn objects_of(&self, kind: RelationKind, subject: i64) -> Result<Vec<i64>, RepoError>;

    /// One page of distinct subject ids for `kind`, ordered ascending.
    async fn subjects_page(
        &self,
        kind: RelationKind,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<i64>, RepoError>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn author_of(&self, post: PostId) -> Result<Option<UserId>, RepoError>;

    async fn authors_of(&self, posts: &[PostId]) -> Result<HashMap<PostId, UserId>, RepoError>;

    /// Recent posts by `author`, newest first, as `(post, published_at)` with
    /// millisecond timestamps.
    async fn recent_by_author(
        &self,
        author: UserId,
        limit: i64,
    ) -> Result<Vec<(PostId, i64)>, RepoError>;
}

#[async_trait]
pub trait HistoryRepo: Send + Sync {
    async fn record(&self, user: UserId, post: PostId, viewed_at: i64) -> Result<(), RepoError>;

    /// Recently viewed posts for `user`, newest first, skipping `exclude`
    /// rows entirely and then `offset` of the remainder. The offset is what
    /// lets history pages keep advancing once the cached window is spent.
    async fn recent_excluding(
        &self,
        user: UserId,
        exclude: &[PostId],
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PostId>, RepoError>;

    async fn remove(&self, user: UserId, post: PostId) -> Result<(), RepoError>;

    async fn clear(&self, user: UserId) -> Result<(), RepoError>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory repositories for exercising services without Postgres.

    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct MemoryRepos {
        relations: Mutex<HashMap<RelationKind, BTreeSet<(i64, i64)>>>,
        posts: Mutex<HashMap<i64, (i64, i64)>>,
        history: Mutex<Vec<(i64, i64, i64)>>,
        fail_writes: AtomicBool,
    }

    impl MemoryRepos {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every write return `RepoError::Unavailable` until cleared.
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn seed_pair(&self, kind: RelationKind, subject: i64, object: i64) {
            self.relations
                .lock()
                .unwrap()
                .entry(kind)
                .or_default()
                .insert((subject, object));
        }

        pub fn pairs(&self, kind: RelationKind) -> Vec<(i64, i64)> {
            self.relations
                .lock()
                .unwrap()
                .get(&kind)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        }

        pub fn seed_post(&self, post: i64, author: i64, published_at: i64) {
            self.posts
                .lock()
                .unwrap()
                .insert(post, (author, published_at));
        }

        pub fn history_len(&self) -> usize {
            self.history.lock().unwrap().len()
        }

        pub fn seed_history(&self, user: i64, post: i64, viewed_at: i64) {
            self.history.lock().unwrap().push((user, post, viewed_at));
        }

        fn check_writable(&self) -> Result<(), RepoError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(RepoError::unavailable("injected write failure"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RelationRepo for MemoryRepos {
        async fn exists(
            &self,
            kind: RelationKind,
            subject: i64,
            object: i64,
        ) -> Result<bool, RepoError> {
            Ok(self
                .relations
                .lock()
                .unwrap()
                .get(&kind)
                .is_some_and(|set| set.contains(&(subject, object))))
        }

        async fn insert(
            &self,
            kind: RelationKind,
            subject: i64,
            object: i64,
        ) -> Result<(), RepoError> {
            self.check_writable()?;
            self.seed_pair(kind, subject, object);
            Ok(())
        }

        async fn delete(
            &self,
            kind: RelationKind,
            subject: i64,
            object: i64,
        ) -> Result<(), RepoError> {
            self.check_writable()?;
            if let Some(set) = self.relations.lock().unwrap().get_mut(&kind) {
                set.remove(&(subject, object));
            }
            Ok(())
        }

        async fn align(
            &self,
            kind: RelationKind,
            subject: i64,
            object: i64,
            present: bool,
        ) -> Result<(), RepoError> {
            self.check_writable()?;
            let mut guard = self.relations.lock().unwrap();
            let set = guard.entry(kind).or_default();
            if present {
                set.insert((subject, object));
            } else {
                set.remove(&(subject, object));
            }
            Ok(())
        }

        async fn insert_batch(
            &self,
            kind: RelationKind,
            pairs: &[(i64, i64)],
        ) -> Result<u64, RepoError> {
            self.check_writable()?;
            let mut guard = self.relations.lock().unwrap();
            let set = guard.entry(kind).or_default();
            let mut written = 0;
            for pair in pairs {
                if set.insert(*pair) {
                    written += 1;
                }
            }
            Ok(written)
        }

        async fn delete_batch(
            &self,
            kind: RelationKind,
            pairs: &[(i64, i64)],
        ) -> Result<u64, RepoError> {
            self.check_writable()?;
            let mut guard = self.relations.lock().unwrap();
            let Some(set) = guard.get_mut(&kind) else {
                return Ok(0);
            };
            let mut removed = 0;
            for pair in pairs {
                if set.remove(pair) {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        async fn existing_pairs(
            &self,
            kind: RelationKind,
            pairs: &[(i64, i64)],
        ) -> Result<HashSet<(i64, i64)>, RepoError> {
            let guard = self.relations.lock().unwrap();
            let Some(set) = guard.get(&kind) else {
                return Ok(HashSet::new());
            };
            Ok(pairs
                .iter()
                .filter(|pair| set.contains(pair))
                .copied()
                .collect())
        }

        async fn objects_of(
            &self,
            kind: RelationKind,
            subject: i64,
        ) -> Result<Vec<i64>, RepoError> {
            Ok(self
                .relations
                .lock()
                .unwrap()
                .get(&kind)
                .map(|set| {
                    set.iter()
                        .filter(|(s, _)| *s == subject)
                        .map(|(_, o)| *o)
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn subjects_page(
            &self,
            kind: RelationKind,
            offset: i64,
            limit: i64,
        ) -> Result<Vec<i64>, RepoError> {
            let guard = self.relations.lock().unwrap();
            let Some(set) = guard.get(&kind) else {
                return Ok(Vec::new());
            };
            let mut subjects: Vec<i64> = set.iter().map(|(s, _)| *s).collect();
            subjects.dedup();
            Ok(subjects
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }
    }

    #[async_trait]
    impl PostRepo for MemoryRepos {
        async fn author_of(&self, post: PostId) -> Result<Option<UserId>, RepoError> {
            Ok(self
                .posts
                .lock()
                .unwrap()
                .get(&post.0)
                .map(|(author, _)| UserId(*author)))
        }

        async fn authors_of(
            &self,
            posts: &[PostId],
        ) -> Result<HashMap<PostId, UserId>, RepoError> {
            let guard = self.posts.lock().unwrap();
            Ok(posts
                .iter()
                .filter_map(|post| guard.get(&post.0).map(|(author, _)| (*post, UserId(*author))))
                .collect())
        }

        async fn recent_by_author(
            &self,
            author: UserId,
            limit: i64,
        ) -> Result<Vec<(PostId, i64)>, RepoError> {
            let guard = self.posts.lock().unwrap();
            let mut posts: Vec<(PostId, i64)> = guard
                .iter()
                .filter(|(_, (a, _))| *a == author.0)
                .map(|(post, (_, at))| (PostId(*post), *at))
                .collect();
            posts.sort_by_key(|(_, at)| std::cmp::Reverse(*at));
            posts.truncate(limit as usize);
            Ok(posts)
        }
    }

    #[async_trait]
    impl HistoryRepo for MemoryRepos {
        async fn record(
            &self,
            user: UserId,
            post: PostId,
            viewed_at: i64,
        ) -> Result<(), RepoError> {
            self.check_writable()?;
            self.history.lock().unwrap().push((user.0, post.0, viewed_at));
            Ok(())
        }

        async fn recent_excluding(
            &self,
            user: UserId,
            exclude: &[PostId],
            offset: i64,
            limit: i64,
        ) -> Result<Vec<PostId>, RepoError> {
            let skip: HashSet<i64> = exclude.iter().map(|p| p.0).collect();
            let mut rows: Vec<(i64, i64)> = self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, p, _)| *u == user.0 && !skip.contains(p))
                .map(|(_, p, at)| (*p, *at))
                .collect();
            rows.sort_by_key(|(_, at)| std::cmp::Reverse(*at));
            let mut seen = HashSet::new();
            Ok(rows
                .into_iter()
                .filter(|(p, _)| seen.insert(*p))
                .skip(offset as usize)
                .take(limit as usize)
                .map(|(p, _)| PostId(p))
                .collect())
        }

        async fn remove(&self, user: UserId, post: PostId) -> Result<(), RepoError> {
            self.check_writable()?;
            self.history
                .lock()
                .unwrap()
                .retain(|(u, p, _)| !(*u == user.0 && *p == post.0));
            Ok(())
        }

        async fn clear(&self, user: UserId) -> Result<(), RepoError> {
            self.check_writable()?;
            self.history.lock().unwrap().retain(|(u, _, _)| *u != user.0);
            Ok(())
        }
    }
}
