//! Ranking engine: per-dimension leaderboards and the composite hot score.

use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::domain::types::{Dimension, EngagementEvent, Period, PostId};
use crate::fast::FastStore;
use crate::util::keys;

// Composite hot-score weights. The share dimension is not tracked yet, so
// its 0.1 slot contributes nothing until share events exist.
const WEIGHT_LIKES: f64 = 0.4;
const WEIGHT_FAVORITES: f64 = 0.3;
const WEIGHT_COMMENTS: f64 = 0.2;
#[allow(dead_code)]
const WEIGHT_SHARES: f64 = 0.1;

pub struct RankingEngine {
    store: Arc<FastStore>,
}

impl RankingEngine {
    pub fn new(store: Arc<FastStore>) -> Self {
        Self { store }
    }

    /// Apply an engagement event and recompute the post's hot score.
    ///
    /// The dimension adjustment and the hot-score rewrite across every period
    /// set happen under one write guard, so no reader observes a dimension
    /// count that disagrees with the composite score.
    pub fn record_event(&self, post: PostId, event: EngagementEvent) {
        let member = post.to_string();
        let dim_key = keys::ranking_dimension(event.dimension());
        self.store.update("ranking_record_event", |ks| {
            let zset = ks.zset_mut(&dim_key);
            let next = zset.increment(&member, event.delta());
            if next <= 0.0 {
                zset.remove(&member);
                ks.prune_if_empty(&dim_key);
            }
            Self::write_hot_score(ks, &member);
        });
        counter!("tideline_ranking_events_total", "dimension" => event.dimension().as_str())
            .increment(1);
        debug!(post = %post, event = ?event, "Recorded engagement event");
    }

    /// Recompute the composite score from the current dimension counts and
    /// write it into every period set. Scores are never incremented in place.
    pub fn recompute_hot_score(&self, post: PostId) {
        let member = post.to_string();
        self.store.update("ranking_recompute", |ks| {
            Self::write_hot_score(ks, &member);
        });
    }

    fn write_hot_score(ks: &mut crate::fast::Keyspace, member: &str) {
        let mut score = 0.0;
        for (dim, weight) in [
            (Dimension::Likes, WEIGHT_LIKES),
            (Dimension::Favorites, WEIGHT_FAVORITES),
            (Dimension::Comments, WEIGHT_COMMENTS),
        ] {
            let count = ks
                .zset(&keys::ranking_dimension(dim))
                .and_then(|z| z.score(member))
                .unwrap_or(0.0)
                .max(0.0);
            score += weight * count;
        }
        for period in Period::ALL {
            ks.zset_mut(&keys::ranking_hot(period)).insert(member, score);
        }
    }

    /// One page of the leaderboard for a single dimension, highest first.
    pub fn top_by_dimension(
        &self,
        dim: Dimension,
        page: usize,
        page_size: usize,
    ) -> Vec<(PostId, u64)> {
        page_of(&self.store, &keys::ranking_dimension(dim), page, page_size)
            .into_iter()
            .map(|(post, score)| (post, score.max(0.0) as u64))
            .collect()
    }

    /// One page of the composite hot ranking for a period, hottest first.
    pub fn top_hot(&self, period: Period, page: usize, page_size: usize) -> Vec<(PostId, f64)> {
        page_of(&self.store, &keys::ranking_hot(period), page, page_size)
    }

    /// 1-based position in the period's hot ranking.
    pub fn rank(&self, post: PostId, period: Period) -> Option<u64> {
        self.store
            .zrev_rank(&keys::ranking_hot(period), &post.to_string())
            .map(|rank| rank as u64 + 1)
    }

    pub fn hot_score(&self, post: PostId, period: Period) -> Option<f64> {
        self.store.zscore(&keys::ranking_hot(period), &post.to_string())
    }

    pub fn dimension_count(&self, post: PostId, dim: Dimension) -> u64 {
        self.store
            .zscore(&keys::ranking_dimension(dim), &post.to_string())
            .unwrap_or(0.0)
            .max(0.0) as u64
    }

    /// Drop a deleted post from every dimension and period set.
    pub fn remove_post(&self, post: PostId) {
        let member = post.to_string();
        self.store.update("ranking_remove_post", |ks| {
            for dim in Dimension::ALL {
                let key = keys::ranking_dimension(dim);
                ks.zset_mut(&key).remove(&member);
                ks.prune_if_empty(&key);
            }
            for period in Period::ALL {
                let key = keys::ranking_hot(period);
                ks.zset_mut(&key).remove(&member);
                ks.prune_if_empty(&key);
            }
        });
    }
}

fn page_of(store: &FastStore, key: &str, page: usize, page_size: usize) -> Vec<(PostId, f64)> {
    if page_size == 0 {
        return Vec::new();
    }
    let page = page.max(1);
    let start = (page - 1) * page_size;
    let stop = start + page_size - 1;
    store
        .zrev_range_with_scores(key, start, stop)
        .into_iter()
        .filter_map(|(member, score)| member.parse().ok().map(|id| (PostId(id), score)))
        .collect()
}
