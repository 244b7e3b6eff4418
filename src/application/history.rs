//! Browse history: a bounded per-user recency structure with durable
//! fallback.
//!
//! The fast store keeps the most recent `max_entries` views per user; older
//! rows live only in the durable store and are pulled in when a read outruns
//! the cached window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;
use tracing::warn;

use crate::application::repos::HistoryRepo;
use crate::config::HistorySettings;
use crate::domain::types::{PostId, UserId};
use crate::fast::FastStore;
use crate::util::keys;

const SOURCE: &str = "history";

pub struct HistoryService {
    store: Arc<FastStore>,
    repo: Arc<dyn HistoryRepo>,
    settings: HistorySettings,
    /// Users recently confirmed to have no durable history; suppresses
    /// repeated durable lookups until the marker expires.
    known_empty: DashMap<i64, Instant>,
}

impl HistoryService {
    pub fn new(store: Arc<FastStore>, repo: Arc<dyn HistoryRepo>, settings: HistorySettings) -> Self {
        Self {
            store,
            repo,
            settings,
            known_empty: DashMap::new(),
        }
    }

    /// Record a view at the current time. The insert and the overflow trim
    /// happen under one write guard; returns the number of evicted entries.
    pub async fn record(&self, user: UserId, post: PostId) -> usize {
        let key = keys::browse_history(user);
        let member = post.to_string();
        let now = now_millis();
        let max = self.settings.max_entries;
        let evicted = self.store.update("history_record", |ks| {
            let zset = ks.zset_mut(&key);
            zset.insert(&member, now as f64);
            zset.trim_lowest(max)
        });
        if evicted > 0 {
            counter!("tideline_history_evictions_total").increment(evicted as u64);
        }
        self.known_empty.remove(&user.0);
        if let Err(error) = self.repo.record(user, post, now).await {
            warn!(user = %user, post = %post, %error, target_module = SOURCE,
                "Durable history write failed");
        }
        evicted
    }

    /// Most recent views, newest first. Short fast-store reads are topped up
    /// from the durable store, excluding ids already returned.
    pub async fn recent(&self, user: UserId, limit: usize) -> Vec<PostId> {
        if limit == 0 {
            return Vec::new();
        }
        let key = keys::browse_history(user);
        let fast: Vec<PostId> = parse_posts(self.store.zrev_range(&key, 0, limit - 1));
        if fast.len() >= limit {
            return fast;
        }
        let cached_total = self.store.zcard(&key);
        self.top_up(user, fast, limit, cached_total).await
    }

    /// One page, newest first, 1-based page numbers.
    pub async fn page(&self, user: UserId, page: usize, page_size: usize) -> Vec<PostId> {
        if page_size == 0 {
            return Vec::new();
        }
        let page = page.max(1);
        let start = (page - 1) * page_size;
        let key = keys::browse_history(user);
        let slice = parse_posts(self.store.zrev_range(&key, start, start + page_size - 1));
        if slice.len() >= page_size {
            return slice;
        }
        // The cached window ran out inside this page; everything cached is
        // excluded from the durable read so rows are not returned twice, and
        // pages fully past the window advance through the durable rows by
        // however many of them earlier pages already consumed.
        let cached_total = self.store.zcard(&key);
        let cached_all = parse_posts(self.store.zrev_range(&key, 0, cached_total.max(1) - 1));
        let durable_offset = start.saturating_sub(cached_total);
        let missing = page_size - slice.len();
        let mut merged = slice;
        match self
            .repo
            .recent_excluding(user, &cached_all, durable_offset as i64, missing as i64)
            .await
        {
            Ok(older) => merged.extend(older),
            Err(error) => {
                warn!(user = %user, %error, target_module = SOURCE,
                    "Durable history read failed; serving cached window only");
            }
        }
        merged
    }

    pub async fn forget(&self, user: UserId, post: PostId) -> bool {
        let removed = self.store.zrem(&keys::browse_history(user), &post.to_string());
        if let Err(error) = self.repo.remove(user, post).await {
            warn!(user = %user, post = %post, %error, target_module = SOURCE,
                "Durable history delete failed");
        }
        removed
    }

    pub async fn clear(&self, user: UserId) {
        self.store.del(&keys::browse_history(user));
        if let Err(error) = self.repo.clear(user).await {
            warn!(user = %user, %error, target_module = SOURCE,
                "Durable history clear failed");
        }
        self.known_empty.insert(user.0, Instant::now());
    }

    pub fn len(&self, user: UserId) -> usize {
        self.store.zcard(&keys::browse_history(user))
    }

    async fn top_up(
        &self,
        user: UserId,
        fast: Vec<PostId>,
        limit: usize,
        cached_total: usize,
    ) -> Vec<PostId> {
        if fast.is_empty() && cached_total == 0 && self.empty_marker_fresh(user) {
            return fast;
        }
        let missing = limit - fast.len();
        let mut merged = fast;
        match self
            .repo
            .recent_excluding(user, &merged, 0, missing as i64)
            .await
        {
            Ok(older) => {
                if merged.is_empty() && older.is_empty() {
                    self.known_empty.insert(user.0, Instant::now());
                }
                merged.extend(older);
            }
            Err(error) => {
                warn!(user = %user, %error, target_module = SOURCE,
                    "Durable history read failed; serving cached window only");
            }
        }
        merged
    }

    fn empty_marker_fresh(&self, user: UserId) -> bool {
        let ttl = Duration::from_secs(self.settings.empty_marker_ttl_secs);
        match self.known_empty.get(&user.0) {
            Some(marked) if marked.elapsed() < ttl => true,
            Some(_) => {
                drop(self.known_empty.remove(&user.0));
                false
            }
            None => false,
        }
    }
}

fn parse_posts(members: Vec<String>) -> Vec<PostId> {
    members
        .into_iter()
        .filter_map(|member| member.parse().ok().map(PostId))
        .collect()
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
