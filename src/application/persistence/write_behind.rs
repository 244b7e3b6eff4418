//! Coalescing buffer for batched relation persistence.
//!
//! One slot per `(kind, subject, object)` triple; a later operation on the
//! same triple overwrites the earlier intent, so a like/unlike flutter
//! collapses to the final state and the durable store sees at most one write.

use std::time::Instant;

use dashmap::DashMap;

use crate::domain::types::RelationKind;

pub type BufferKey = (RelationKind, i64, i64);

#[derive(Debug, Clone, Copy)]
pub struct PendingWrite {
    /// Desired durable state: `true` inserts the row, `false` deletes it.
    pub present: bool,
    pub recorded_at: Instant,
}

#[derive(Debug, Default)]
pub struct WriteBehindBuffer {
    entries: DashMap<BufferKey, PendingWrite>,
}

impl WriteBehindBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest intent for a triple, replacing any earlier one.
    pub fn record(&self, kind: RelationKind, subject: i64, object: i64, present: bool) {
        self.entries.insert(
            (kind, subject, object),
            PendingWrite {
                present,
                recorded_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return everything currently buffered.
    pub fn drain_snapshot(&self) -> Vec<(BufferKey, PendingWrite)> {
        let keys: Vec<BufferKey> = self.entries.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    /// Put a failed snapshot back without clobbering intents recorded after
    /// the drain; the newer intent supersedes the snapshotted one.
    pub fn restore(&self, snapshot: Vec<(BufferKey, PendingWrite)>) {
        for (key, pending) in snapshot {
            self.entries.entry(key).or_insert(pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_intent_replaces_earlier() {
        let buffer = WriteBehindBuffer::new();
        buffer.record(RelationKind::Like, 1, 2, true);
        buffer.record(RelationKind::Like, 1, 2, false);
        assert_eq!(buffer.len(), 1);

        let snapshot = buffer.drain_snapshot();
        assert!(!snapshot[0].1.present);
        assert!(buffer.is_empty());
    }

    #[test]
    fn restore_does_not_clobber_newer_intent() {
        let buffer = WriteBehindBuffer::new();
        buffer.record(RelationKind::Favorite, 3, 4, true);
        let snapshot = buffer.drain_snapshot();

        // A new operation lands while the flush is failing.
        buffer.record(RelationKind::Favorite, 3, 4, false);
        buffer.restore(snapshot);

        let merged = buffer.drain_snapshot();
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].1.present);
    }
}
