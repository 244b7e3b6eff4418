//! Persistence strategy layer.
//!
//! Follow and block edges are written through to the durable store on the
//! mutation path; like and favorite edges are buffered and flushed in
//! batches. In both modes the fast store remains authoritative and a durable
//! write failure is a soft failure repaired later by reconciliation.

mod write_behind;

pub use write_behind::{BufferKey, PendingWrite, WriteBehindBuffer};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tracing::{debug, info, warn};

use crate::application::error::AppError;
use crate::application::repos::RelationRepo;
use crate::config::WriteBehindSettings;
use crate::domain::types::RelationKind;
use crate::fast::lock::mutex_guard;

const SOURCE: &str = "persistence";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// False when another flush was already in flight and this call yielded.
    pub performed: bool,
    pub inserted: u64,
    pub deleted: u64,
}

pub struct PersistenceService {
    repo: Arc<dyn RelationRepo>,
    buffer: WriteBehindBuffer,
    settings: WriteBehindSettings,
    flushing: AtomicBool,
    last_flush: Mutex<Instant>,
    stopped: AtomicBool,
}

impl PersistenceService {
    pub fn new(repo: Arc<dyn RelationRepo>, settings: WriteBehindSettings) -> Self {
        Self {
            repo,
            buffer: WriteBehindBuffer::new(),
            settings,
            flushing: AtomicBool::new(false),
            last_flush: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Write-through (follow / block)
    // ========================================================================

    /// Synchronously align one durable row with the fast-store state. The
    /// repository runs the existence check and the write in one transaction.
    pub async fn write_through(
        &self,
        kind: RelationKind,
        subject: i64,
        object: i64,
        present: bool,
    ) -> Result<(), AppError> {
        self.repo.align(kind, subject, object, present).await?;
        Ok(())
    }

    // ========================================================================
    // Write-behind (like / favorite)
    // ========================================================================

    /// Buffer the latest intent for a triple. Crossing the size threshold
    /// triggers an immediate flush; a flush failure here is logged and the
    /// entries stay buffered for the ticker to retry.
    pub async fn enqueue(&self, kind: RelationKind, subject: i64, object: i64, present: bool) {
        self.buffer.record(kind, subject, object, present);
        let depth = self.buffer.len();
        gauge!("tideline_write_behind_depth").set(depth as f64);
        if depth >= self.settings.batch_threshold {
            if let Err(error) = self.flush().await {
                warn!(%error, depth, target_module = SOURCE, "Threshold flush failed");
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drain the buffer into batched durable writes. Single-flight: a call
    /// that finds a flush already running returns without doing work.
    pub async fn flush(&self) -> Result<FlushOutcome, AppError> {
        if self.flushing.swap(true, Ordering::SeqCst) {
            debug!(target_module = SOURCE, "Flush already in flight, yielding");
            return Ok(FlushOutcome::default());
        }
        let result = self.flush_locked().await;
        self.flushing.store(false, Ordering::SeqCst);
        result
    }

    async fn flush_locked(&self) -> Result<FlushOutcome, AppError> {
        *mutex_guard(&self.last_flush, SOURCE, "flush") = Instant::now();
        let snapshot = self.buffer.drain_snapshot();
        if snapshot.is_empty() {
            return Ok(FlushOutcome {
                performed: true,
                ..FlushOutcome::default()
            });
        }
        let started = Instant::now();

        // Partition per kind into desired inserts and deletes.
        let mut inserts: HashMap<RelationKind, Vec<(i64, i64)>> = HashMap::new();
        let mut deletes: HashMap<RelationKind, Vec<(i64, i64)>> = HashMap::new();
        for ((kind, subject, object), pending) in &snapshot {
            let bucket = if pending.present {
                &mut inserts
            } else {
                &mut deletes
            };
            bucket.entry(*kind).or_default().push((*subject, *object));
        }

        let applied = self.apply_partitions(&inserts, &deletes).await;
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(error) => {
                // Batches are idempotent, so restoring the whole snapshot and
                // retrying later cannot double-apply.
                self.buffer.restore(snapshot);
                gauge!("tideline_write_behind_depth").set(self.buffer.len() as f64);
                return Err(error);
            }
        };

        gauge!("tideline_write_behind_depth").set(self.buffer.len() as f64);
        histogram!("tideline_write_behind_flush_seconds").record(started.elapsed().as_secs_f64());
        counter!("tideline_write_behind_flushed_total", "op" => "insert")
            .increment(outcome.inserted);
        counter!("tideline_write_behind_flushed_total", "op" => "delete")
            .increment(outcome.deleted);
        info!(
            inserted = outcome.inserted,
            deleted = outcome.deleted,
            drained = snapshot.len(),
            target_module = SOURCE,
            "Write-behind flush complete"
        );
        Ok(outcome)
    }

    async fn apply_partitions(
        &self,
        inserts: &HashMap<RelationKind, Vec<(i64, i64)>>,
        deletes: &HashMap<RelationKind, Vec<(i64, i64)>>,
    ) -> Result<FlushOutcome, AppError> {
        let mut outcome = FlushOutcome {
            performed: true,
            ..FlushOutcome::default()
        };
        for (kind, pairs) in inserts {
            let existing = self.repo.existing_pairs(*kind, pairs).await?;
            let missing: Vec<(i64, i64)> = pairs
                .iter()
                .filter(|pair| !existing.contains(pair))
                .copied()
                .collect();
            if !missing.is_empty() {
                outcome.inserted += self.repo.insert_batch(*kind, &missing).await?;
            }
        }
        for (kind, pairs) in deletes {
            outcome.deleted += self.repo.delete_batch(*kind, pairs).await?;
        }
        Ok(outcome)
    }

    /// Whether the delay-elapsed or threshold trigger fires right now.
    pub fn due_for_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        if self.buffer.len() >= self.settings.batch_threshold {
            return true;
        }
        mutex_guard(&self.last_flush, SOURCE, "due_check").elapsed()
            >= Duration::from_secs(self.settings.flush_delay_secs)
    }

    /// Background loop driving the delay-elapsed trigger. Stops at the next
    /// tick after [`PersistenceService::stop`].
    pub async fn run_flush_ticker(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            delay_secs = self.settings.flush_delay_secs,
            threshold = self.settings.batch_threshold,
            target_module = SOURCE,
            "Write-behind flush ticker started"
        );
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                info!(target_module = SOURCE, "Write-behind flush ticker stopped");
                return;
            }
            if !self.due_for_flush() {
                continue;
            }
            if let Err(error) = self.flush().await {
                warn!(%error, target_module = SOURCE, "Scheduled flush failed");
            }
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
