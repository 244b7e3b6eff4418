//! Timeline aggregator: per-author and global publish feeds, and the
//! fan-out-on-read personal feed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lru::LruCache;
use metrics::histogram;
use tracing::warn;

use crate::application::error::AppError;
use crate::application::relations::RelationService;
use crate::application::repos::PostRepo;
use crate::config::TimelineSettings;
use crate::domain::types::{PostId, UserId};
use crate::fast::lock::mutex_guard;
use crate::fast::{Aggregate, FastStore, SortedSet};
use crate::util::keys;

const SOURCE: &str = "timeline";

/// Which timeline a range query runs against.
#[derive(Debug, Clone, Copy)]
pub enum TimelineScope {
    Author(UserId),
    Global,
}

impl TimelineScope {
    fn key(self) -> String {
        match self {
            TimelineScope::Author(author) => keys::timeline_author(author),
            TimelineScope::Global => keys::timeline_global(),
        }
    }
}

pub struct TimelineService {
    store: Arc<FastStore>,
    relations: Arc<RelationService>,
    posts: Arc<dyn PostRepo>,
    settings: TimelineSettings,
    /// Post → author lookups resolved during feed filtering.
    author_cache: Mutex<LruCache<PostId, UserId>>,
}

impl TimelineService {
    pub fn new(
        store: Arc<FastStore>,
        relations: Arc<RelationService>,
        posts: Arc<dyn PostRepo>,
        settings: TimelineSettings,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(settings.author_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            relations,
            posts,
            settings,
            author_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert a post into the author and global timelines, trimming both to
    /// the cached bound, all under one write guard. Returns total evictions.
    pub fn publish(&self, author: UserId, post: PostId, published_at: i64) -> usize {
        let author_key = keys::timeline_author(author);
        let global_key = keys::timeline_global();
        let member = post.to_string();
        let max = self.settings.max_cached_posts;
        self.store.update("timeline_publish", |ks| {
            let author_zset = ks.zset_mut(&author_key);
            author_zset.insert(&member, published_at as f64);
            let mut evicted = author_zset.trim_lowest(max);
            let global_zset = ks.zset_mut(&global_key);
            global_zset.insert(&member, published_at as f64);
            evicted += global_zset.trim_lowest(max);
            evicted
        })
    }

    /// Remove a post from both timeline scopes atomically.
    pub fn remove(&self, author: UserId, post: PostId) {
        let author_key = keys::timeline_author(author);
        let global_key = keys::timeline_global();
        let member = post.to_string();
        self.store.update("timeline_remove", |ks| {
            ks.zset_mut(&author_key).remove(&member);
            ks.zset_mut(&global_key).remove(&member);
            ks.prune_if_empty(&author_key);
            ks.prune_if_empty(&global_key);
        });
    }

    /// One page of an author's timeline, newest first. An author whose cached
    /// timeline is missing entirely is rehydrated from the durable store.
    pub async fn author_timeline(
        &self,
        author: UserId,
        page: usize,
        page_size: usize,
    ) -> Vec<(PostId, i64)> {
        let key = keys::timeline_author(author);
        if self.store.zcard(&key) == 0 {
            self.hydrate_author(author, &key).await;
        }
        page_of(&self.store, &key, page, page_size)
    }

    pub fn global_timeline(&self, page: usize, page_size: usize) -> Vec<(PostId, i64)> {
        page_of(&self.store, &keys::timeline_global(), page, page_size)
    }

    /// Posts published in `[from, to]` milliseconds, oldest first.
    pub fn range_by_time(&self, scope: TimelineScope, from: i64, to: i64) -> Vec<PostId> {
        self.store
            .zrange_by_score(&scope.key(), from as f64, to as f64)
            .into_iter()
            .filter_map(|member| member.parse().ok().map(PostId))
            .collect()
    }

    /// Fan-out-on-read personal feed.
    ///
    /// Merges the timelines of the viewer's non-blocked followees into a
    /// call-unique scratch key with max-aggregation, pages it newest first,
    /// then re-filters by post author. The scratch key is deleted on every
    /// exit path.
    pub async fn my_feed(
        &self,
        viewer: UserId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<(PostId, i64)>, AppError> {
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let following = self.relations.following(viewer);
        let sources = self.relations.filter_blocked(viewer, &following);
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let scratch = keys::timeline_feed_scratch(viewer);
        let started = Instant::now();
        self.store.update("feed_union", |ks| {
            let merged = {
                let sets: Vec<&SortedSet> = sources
                    .iter()
                    .filter_map(|author| ks.zset(&keys::timeline_author(*author)))
                    .collect();
                SortedSet::union(sets, Aggregate::Max)
            };
            *ks.zset_mut(&scratch) = merged;
        });

        let result = self.filtered_page(viewer, &scratch, page, page_size).await;
        if !self.store.del(&scratch) {
            warn!(key = %scratch, target_module = SOURCE, "Feed scratch key already gone");
        }
        histogram!("tideline_feed_merge_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    /// Page the scratch set and apply the author-level block filter. A post
    /// whose author cannot be resolved is kept; the merge-time filter already
    /// removed every known-blocked source.
    async fn filtered_page(
        &self,
        viewer: UserId,
        scratch: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<(PostId, i64)>, AppError> {
        let entries = page_of(&self.store, scratch, page, page_size);
        if entries.is_empty() {
            return Ok(entries);
        }

        let post_ids: Vec<PostId> = entries.iter().map(|(post, _)| *post).collect();
        let authors = self.resolve_authors(&post_ids).await;
        let mut unique_authors: Vec<UserId> = authors.values().copied().collect();
        unique_authors.sort_unstable();
        unique_authors.dedup();
        let allowed = self.relations.filter_blocked(viewer, &unique_authors);

        Ok(entries
            .into_iter()
            .filter(|(post, _)| match authors.get(post) {
                Some(author) => allowed.contains(author),
                None => true,
            })
            .collect())
    }

    async fn resolve_authors(
        &self,
        posts: &[PostId],
    ) -> std::collections::HashMap<PostId, UserId> {
        let mut resolved = std::collections::HashMap::new();
        let mut misses = Vec::new();
        {
            let mut cache = mutex_guard(&self.author_cache, SOURCE, "author_cache_get");
            for post in posts {
                match cache.get(post) {
                    Some(author) => {
                        resolved.insert(*post, *author);
                    }
                    None => misses.push(*post),
                }
            }
        }
        if misses.is_empty() {
            return resolved;
        }
        match self.posts.authors_of(&misses).await {
            Ok(fetched) => {
                let mut cache = mutex_guard(&self.author_cache, SOURCE, "author_cache_put");
                for (post, author) in &fetched {
                    cache.put(*post, *author);
                }
                resolved.extend(fetched);
            }
            Err(error) => {
                warn!(%error, target_module = SOURCE,
                    "Author lookup failed; serving feed without author filter");
            }
        }
        resolved
    }

    async fn hydrate_author(&self, author: UserId, key: &str) {
        let limit = self.settings.max_cached_posts as i64;
        match self.posts.recent_by_author(author, limit).await {
            Ok(rows) => {
                if rows.is_empty() {
                    return;
                }
                self.store.update("timeline_hydrate", |ks| {
                    let zset = ks.zset_mut(key);
                    for (post, published_at) in &rows {
                        zset.insert(post.to_string(), *published_at as f64);
                    }
                });
            }
            Err(error) => {
                warn!(author = %author, %error, target_module = SOURCE,
                    "Timeline hydration failed; serving cached window only");
            }
        }
    }
}

fn page_of(store: &FastStore, key: &str, page: usize, page_size: usize) -> Vec<(PostId, i64)> {
    if page_size == 0 {
        return Vec::new();
    }
    let page = page.max(1);
    let start = (page - 1) * page_size;
    store
        .zrev_range_with_scores(key, start, start + page_size - 1)
        .into_iter()
        .filter_map(|(member, score)| member.parse().ok().map(|id| (PostId(id), score as i64)))
        .collect()
}
