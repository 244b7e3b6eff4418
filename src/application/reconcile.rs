//! Reconciliation: periodic diff-and-repair between the fast store and the
//! durable store, with the fast store as ground truth.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::application::error::AppError;
use crate::application::repos::RelationRepo;
use crate::config::ReconciliationSettings;
use crate::domain::types::RelationKind;
use crate::fast::FastStore;
use crate::fast::lock::mutex_guard;
use crate::util::keys;

const SOURCE: &str = "reconcile";

/// Outcome of one scope validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationReport {
    pub kind: RelationKind,
    pub scope: i64,
    pub fast_count: usize,
    pub durable_count: usize,
    /// Rows written to the durable store (present fast-side only).
    pub inserted: u64,
    /// Rows removed from the durable store (present durable-side only).
    pub deleted: u64,
}

impl ValidationReport {
    pub fn drift(&self) -> u64 {
        self.inserted + self.deleted
    }
}

/// Outcome of one scheduled sweep iteration.
#[derive(Debug, Clone, Copy)]
pub struct SweepSummary {
    pub kind: RelationKind,
    pub scopes_validated: usize,
    pub repairs: u64,
    /// True when the page came back empty and the cursor wrapped to zero.
    pub wrapped: bool,
}

pub struct ReconciliationService {
    store: Arc<FastStore>,
    repo: Arc<dyn RelationRepo>,
    settings: ReconciliationSettings,
    /// Round-robin position over [`RelationKind::ALL`].
    cursor: AtomicUsize,
    /// Per-kind pagination offsets into the durable subject listing.
    offsets: Mutex<[i64; RelationKind::ALL.len()]>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<FastStore>,
        repo: Arc<dyn RelationRepo>,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            store,
            repo,
            settings,
            cursor: AtomicUsize::new(0),
            offsets: Mutex::new([0; RelationKind::ALL.len()]),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Compare one scope's fast-store set against its durable rows and repair
    /// the durable side in both directions.
    pub async fn validate(
        &self,
        kind: RelationKind,
        scope: i64,
    ) -> Result<ValidationReport, AppError> {
        let fast: HashSet<i64> = self
            .store
            .smembers(&keys::relation_scope(kind, scope))
            .into_iter()
            .filter_map(|member| member.parse().ok())
            .collect();
        let durable: HashSet<i64> = self.repo.objects_of(kind, scope).await?.into_iter().collect();

        let missing: Vec<(i64, i64)> = fast
            .difference(&durable)
            .map(|object| (scope, *object))
            .collect();
        let stale: Vec<(i64, i64)> = durable
            .difference(&fast)
            .map(|object| (scope, *object))
            .collect();

        let mut report = ValidationReport {
            kind,
            scope,
            fast_count: fast.len(),
            durable_count: durable.len(),
            inserted: 0,
            deleted: 0,
        };
        if !missing.is_empty() {
            report.inserted = self.repo.insert_batch(kind, &missing).await?;
        }
        if !stale.is_empty() {
            report.deleted = self.repo.delete_batch(kind, &stale).await?;
        }

        if report.drift() > 0 {
            counter!("tideline_reconciliation_repairs_total", "kind" => kind.as_str())
                .increment(report.drift());
            warn!(
                kind = kind.as_str(),
                scope,
                fast = report.fast_count,
                durable_before = report.durable_count,
                durable_after = report.fast_count,
                inserted = report.inserted,
                deleted = report.deleted,
                target_module = SOURCE,
                "Repaired drifted relation scope"
            );
        }
        Ok(report)
    }

    /// One sweep iteration: pick the next kind round-robin, validate one page
    /// of its durable subjects, advance (or wrap) that kind's offset.
    /// Returns `None` when another sweep is already in flight.
    pub async fn sweep_once(&self) -> Result<Option<SweepSummary>, AppError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(target_module = SOURCE, "Sweep already in flight, skipping");
            return Ok(None);
        }
        let result = self.sweep_locked().await;
        self.running.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn sweep_locked(&self) -> Result<SweepSummary, AppError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % RelationKind::ALL.len();
        let kind = RelationKind::ALL[index];
        let offset = mutex_guard(&self.offsets, SOURCE, "offset_read")[index];

        let page = self
            .repo
            .subjects_page(kind, offset, self.settings.batch_size as i64)
            .await?;
        if page.is_empty() {
            mutex_guard(&self.offsets, SOURCE, "offset_wrap")[index] = 0;
            debug!(kind = kind.as_str(), target_module = SOURCE, "Sweep wrapped to start");
            return Ok(SweepSummary {
                kind,
                scopes_validated: 0,
                repairs: 0,
                wrapped: true,
            });
        }

        let mut repairs = 0;
        let scopes = page.len();
        for scope in page {
            repairs += self.validate(kind, scope).await?.drift();
        }
        mutex_guard(&self.offsets, SOURCE, "offset_advance")[index] = offset + scopes as i64;
        info!(
            kind = kind.as_str(),
            offset,
            scopes,
            repairs,
            target_module = SOURCE,
            "Sweep page validated"
        );
        Ok(SweepSummary {
            kind,
            scopes_validated: scopes,
            repairs,
            wrapped: false,
        })
    }

    /// Scheduled sweep loop. Disabled deployments return immediately; a stop
    /// request takes effect at the next tick.
    pub async fn run(self: Arc<Self>) {
        if !self.settings.enabled {
            info!(target_module = SOURCE, "Reconciliation disabled by configuration");
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(self.settings.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.settings.interval_secs,
            batch_size = self.settings.batch_size,
            target_module = SOURCE,
            "Reconciliation sweep started"
        );
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                info!(target_module = SOURCE, "Reconciliation sweep stopped");
                return;
            }
            if let Err(error) = self.sweep_once().await {
                warn!(%error, target_module = SOURCE, "Sweep iteration failed");
            }
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::memory::MemoryRepos;

    fn service(
        store: Arc<FastStore>,
        repo: Arc<MemoryRepos>,
        batch_size: usize,
    ) -> ReconciliationService {
        ReconciliationService::new(
            store,
            repo,
            ReconciliationSettings {
                enabled: true,
                batch_size,
                interval_secs: 1800,
            },
        )
    }

    #[tokio::test]
    async fn validate_repairs_drift_in_both_directions() {
        let store = Arc::new(FastStore::new());
        let repo = Arc::new(MemoryRepos::new());
        // Fast store says user 1 follows 2 and 3; durable store says 3 and 4.
        store.sadd("user:follow:1", "2");
        store.sadd("user:follow:1", "3");
        repo.seed_pair(RelationKind::Follow, 1, 3);
        repo.seed_pair(RelationKind::Follow, 1, 4);

        let svc = service(Arc::clone(&store), Arc::clone(&repo), 100);
        let report = svc.validate(RelationKind::Follow, 1).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(repo.pairs(RelationKind::Follow), vec![(1, 2), (1, 3)]);
        // The fast store is ground truth and stays untouched.
        assert_eq!(store.scard("user:follow:1"), 2);
    }

    #[tokio::test]
    async fn validate_is_quiet_when_stores_agree() {
        let store = Arc::new(FastStore::new());
        let repo = Arc::new(MemoryRepos::new());
        store.sadd("post:like:5", "9");
        repo.seed_pair(RelationKind::Like, 5, 9);

        let svc = service(store, Arc::clone(&repo), 100);
        let report = svc.validate(RelationKind::Like, 5).await.unwrap();
        assert_eq!(report.drift(), 0);
        assert_eq!(repo.pairs(RelationKind::Like), vec![(5, 9)]);
    }

    #[tokio::test]
    async fn sweep_round_robins_kinds_and_wraps_on_empty_page() {
        let store = Arc::new(FastStore::new());
        let repo = Arc::new(MemoryRepos::new());
        repo.seed_pair(RelationKind::Follow, 1, 2);
        store.sadd("user:follow:1", "2");

        let svc = service(store, repo, 10);

        // Follow page validates one scope.
        let first = svc.sweep_once().await.unwrap().unwrap();
        assert_eq!(first.kind, RelationKind::Follow);
        assert_eq!(first.scopes_validated, 1);
        assert!(!first.wrapped);

        // Like, favorite, block have no subjects: empty pages wrap.
        for expected in [RelationKind::Like, RelationKind::Favorite, RelationKind::Block] {
            let summary = svc.sweep_once().await.unwrap().unwrap();
            assert_eq!(summary.kind, expected);
            assert!(summary.wrapped);
        }

        // Back to follow; the advanced offset is past the only subject, so
        // this page is empty and the offset wraps for the next pass.
        let wrapped = svc.sweep_once().await.unwrap().unwrap();
        assert_eq!(wrapped.kind, RelationKind::Follow);
        assert!(wrapped.wrapped);
        let again = svc.sweep_once().await.unwrap().unwrap();
        assert_eq!(again.kind, RelationKind::Like);
        assert!(again.wrapped);
    }

    #[tokio::test]
    async fn sweep_repairs_stale_durable_subjects() {
        let store = Arc::new(FastStore::new());
        let repo = Arc::new(MemoryRepos::new());
        // Durable row with no fast-store counterpart: the unfollow never
        // reached the database.
        repo.seed_pair(RelationKind::Follow, 1, 2);

        let svc = service(store, Arc::clone(&repo), 10);
        let summary = svc.sweep_once().await.unwrap().unwrap();
        assert_eq!(summary.repairs, 1);
        assert!(repo.pairs(RelationKind::Follow).is_empty());
    }
}
