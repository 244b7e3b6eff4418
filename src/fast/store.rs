//! Fast-store facade.
//!
//! Reads take the shared guard and observe a consistent snapshot; every
//! mutation, single-key or multi-key, runs under the exclusive guard. The
//! compound operations the application layer builds with [`FastStore::update`]
//! are therefore atomic with respect to all other callers.

use std::sync::RwLock;

use super::keyspace::Keyspace;
use super::lock::{read_guard, write_guard};

const SOURCE: &str = "fast::store";

#[derive(Debug, Default)]
pub struct FastStore {
    keyspace: RwLock<Keyspace>,
}

impl FastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a mutation closure under the exclusive guard.
    ///
    /// This is the in-process equivalent of a server-executed script: every
    /// key touched inside `f` changes as one indivisible unit.
    pub fn update<T>(&self, op: &'static str, f: impl FnOnce(&mut Keyspace) -> T) -> T {
        let mut guard = write_guard(&self.keyspace, SOURCE, op);
        f(&mut guard)
    }

    /// Run a read closure against a consistent snapshot of the keyspace.
    pub fn read<T>(&self, op: &'static str, f: impl FnOnce(&Keyspace) -> T) -> T {
        let guard = read_guard(&self.keyspace, SOURCE, op);
        f(&guard)
    }

    // ========================================================================
    // Set primitives
    // ========================================================================

    pub fn sadd(&self, key: &str, member: &str) -> bool {
        self.update("sadd", |ks| ks.set_mut(key).insert(member.to_string()))
    }

    pub fn srem(&self, key: &str, member: &str) -> bool {
        self.update("srem", |ks| {
            let removed = ks.set_mut(key).remove(member);
            ks.prune_if_empty(key);
            removed
        })
    }

    pub fn sismember(&self, key: &str, member: &str) -> bool {
        self.read("sismember", |ks| {
            ks.set(key).is_some_and(|set| set.contains(member))
        })
    }

    pub fn smembers(&self, key: &str) -> Vec<String> {
        self.read("smembers", |ks| {
            ks.set(key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn scard(&self, key: &str) -> usize {
        self.read("scard", |ks| ks.set(key).map(|set| set.len()).unwrap_or(0))
    }

    /// Members present in both sets.
    pub fn sinter(&self, left: &str, right: &str) -> Vec<String> {
        self.read("sinter", |ks| match (ks.set(left), ks.set(right)) {
            (Some(a), Some(b)) => a.intersection(b).cloned().collect(),
            _ => Vec::new(),
        })
    }

    // ========================================================================
    // Sorted-set primitives
    // ========================================================================

    pub fn zadd(&self, key: &str, member: &str, score: f64) -> bool {
        self.update("zadd", |ks| ks.zset_mut(key).insert(member, score))
    }

    pub fn zincr(&self, key: &str, member: &str, delta: f64) -> f64 {
        self.update("zincr", |ks| ks.zset_mut(key).increment(member, delta))
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.read("zscore", |ks| ks.zset(key).and_then(|z| z.score(member)))
    }

    pub fn zrem(&self, key: &str, member: &str) -> bool {
        self.update("zrem", |ks| {
            let removed = ks.zset_mut(key).remove(member);
            ks.prune_if_empty(key);
            removed
        })
    }

    pub fn zcard(&self, key: &str) -> usize {
        self.read("zcard", |ks| ks.zset(key).map(|z| z.len()).unwrap_or(0))
    }

    pub fn zrev_range(&self, key: &str, start: usize, stop: usize) -> Vec<String> {
        self.read("zrev_range", |ks| {
            ks.zset(key)
                .map(|z| z.rev_range(start, stop))
                .unwrap_or_default()
        })
    }

    pub fn zrev_range_with_scores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Vec<(String, f64)> {
        self.read("zrev_range_with_scores", |ks| {
            ks.zset(key)
                .map(|z| z.rev_range_with_scores(start, stop))
                .unwrap_or_default()
        })
    }

    pub fn zrev_rank(&self, key: &str, member: &str) -> Option<usize> {
        self.read("zrev_rank", |ks| ks.zset(key).and_then(|z| z.rev_rank(member)))
    }

    pub fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Vec<String> {
        self.read("zrange_by_score", |ks| {
            ks.zset(key)
                .map(|z| z.range_by_score(min, max))
                .unwrap_or_default()
        })
    }

    // ========================================================================
    // List primitives
    // ========================================================================

    pub fn lpush(&self, key: &str, value: &str) -> usize {
        self.update("lpush", |ks| {
            let list = ks.list_mut(key);
            list.push_front(value.to_string());
            list.len()
        })
    }

    pub fn rpop(&self, key: &str) -> Option<String> {
        self.update("rpop", |ks| {
            let popped = ks.list_mut(key).pop_back();
            ks.prune_if_empty(key);
            popped
        })
    }

    pub fn llen(&self, key: &str) -> usize {
        self.read("llen", |ks| ks.list(key).map(|l| l.len()).unwrap_or(0))
    }

    // ========================================================================
    // Misc
    // ========================================================================

    pub fn del(&self, key: &str) -> bool {
        self.update("del", |ks| ks.remove(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read("exists", |ks| ks.contains_key(key))
    }

    pub fn counter(&self, key: &str) -> i64 {
        self.read("counter", |ks| ks.counter(key))
    }
}
