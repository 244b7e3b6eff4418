//! Score-ordered member set, the ordering primitive behind rankings,
//! timelines, and the delay queue.

use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Entry {
    score: f64,
    /// Monotonic insertion sequence. Score ties order by this: ascending
    /// views oldest-inserted first, descending views newest-inserted first.
    seq: u64,
}

/// Aggregation mode for [`SortedSet::union`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Max,
}

/// An ordered set of string members with float scores.
///
/// Ordering queries materialize a sorted view on demand; mutation stays O(1).
/// Scores are always finite: callers only ever insert counts and timestamps.
#[derive(Debug, Default, Clone)]
pub struct SortedSet {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a member. Returns `true` when the member was new.
    pub fn insert(&mut self, member: impl Into<String>, score: f64) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.entries.entry(member.into()) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                slot.get_mut().score = score;
                false
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Entry { score, seq });
                true
            }
        }
    }

    /// Adjust a member's score by `delta`, creating it at `delta` when absent.
    /// Returns the resulting score.
    pub fn increment(&mut self, member: impl Into<String>, delta: f64) -> f64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = self
            .entries
            .entry(member.into())
            .or_insert(Entry { score: 0.0, seq });
        entry.score += delta;
        entry.score
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.entries.get(member).map(|entry| entry.score)
    }

    pub fn remove(&mut self, member: &str) -> bool {
        self.entries.remove(member).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members sorted highest-score-first, ties newest-inserted first.
    fn ranked_desc(&self) -> Vec<(&str, f64)> {
        let mut view: Vec<(&str, f64, u64)> = self
            .entries
            .iter()
            .map(|(member, entry)| (member.as_str(), entry.score, entry.seq))
            .collect();
        view.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(b.2.cmp(&a.2))
        });
        view.into_iter().map(|(m, s, _)| (m, s)).collect()
    }

    /// Inclusive rank range, highest score first.
    pub fn rev_range(&self, start: usize, stop: usize) -> Vec<String> {
        self.rev_range_with_scores(start, stop)
            .into_iter()
            .map(|(member, _)| member)
            .collect()
    }

    pub fn rev_range_with_scores(&self, start: usize, stop: usize) -> Vec<(String, f64)> {
        if start > stop || start >= self.entries.len() {
            return Vec::new();
        }
        self.ranked_desc()
            .into_iter()
            .skip(start)
            .take(stop - start + 1)
            .map(|(member, score)| (member.to_string(), score))
            .collect()
    }

    /// Zero-based position of the member when ordered highest score first.
    pub fn rev_rank(&self, member: &str) -> Option<usize> {
        if !self.entries.contains_key(member) {
            return None;
        }
        self.ranked_desc()
            .iter()
            .position(|(candidate, _)| *candidate == member)
    }

    /// Members with scores in `[min, max]`, lowest score first.
    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<String> {
        let mut hits: Vec<(&str, f64, u64)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.score >= min && entry.score <= max)
            .map(|(member, entry)| (member.as_str(), entry.score, entry.seq))
            .collect();
        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });
        hits.into_iter().map(|(m, _, _)| m.to_string()).collect()
    }

    /// Drop the lowest-ranked members until at most `max_len` remain.
    /// Returns the number evicted.
    pub fn trim_lowest(&mut self, max_len: usize) -> usize {
        if self.entries.len() <= max_len {
            return 0;
        }
        let overflow: Vec<String> = self
            .ranked_desc()
            .into_iter()
            .skip(max_len)
            .map(|(member, _)| member.to_string())
            .collect();
        for member in &overflow {
            self.entries.remove(member);
        }
        overflow.len()
    }

    /// Merge several sets into one, combining duplicate members per
    /// `aggregate`. `Max` preserves chronological meaning when a member is
    /// present in multiple sources.
    pub fn union<'a>(sources: impl IntoIterator<Item = &'a SortedSet>, aggregate: Aggregate) -> Self {
        let mut merged = SortedSet::new();
        for source in sources {
            for (member, entry) in &source.entries {
                match merged.entries.get_mut(member) {
                    Some(existing) => {
                        existing.score = match aggregate {
                            Aggregate::Sum => existing.score + entry.score,
                            Aggregate::Max => existing.score.max(entry.score),
                        };
                    }
                    None => {
                        merged.insert(member.clone(), entry.score);
                    }
                }
            }
        }
        merged
    }
}
