//! Delay queue over a fast-store sorted set scored by due time.
//!
//! Consumption polls at a fixed interval; a task whose handler is not ready
//! yet comes back with a short backoff, a failing handler with a long one.
//! The loop itself never dies and retries indefinitely; bounding retries is
//! the handler's job (typically by dead-lettering through the FIFO queue).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::gauge;
use tracing::{debug, info, warn};

use crate::application::error::AppError;
use crate::config::DelayQueueSettings;
use crate::fast::FastStore;
use crate::util::keys;

const SOURCE: &str = "queues::delay";

#[async_trait]
pub trait DelayTaskHandler: Send + Sync {
    /// `Ok(true)` completes the task. `Ok(false)` means not ready yet and
    /// reschedules with the short backoff. `Err` reschedules with the long
    /// backoff.
    async fn handle(&self, task: &str) -> Result<bool, AppError>;
}

pub struct DelayQueueService {
    store: Arc<FastStore>,
    settings: DelayQueueSettings,
    /// Per-queue stop flags for running consumers.
    consumers: DashMap<String, Arc<AtomicBool>>,
}

impl DelayQueueService {
    pub fn new(store: Arc<FastStore>, settings: DelayQueueSettings) -> Self {
        Self {
            store,
            settings,
            consumers: DashMap::new(),
        }
    }

    /// Schedule a task for `due_at` (unix milliseconds). Scheduling an
    /// already queued task moves its due time.
    pub fn schedule(&self, queue: &str, task: &str, due_at: i64) -> bool {
        self.store
            .zadd(&keys::delay_queue(queue), task, due_at as f64)
    }

    pub fn schedule_after(&self, queue: &str, task: &str, delay: Duration) -> bool {
        self.schedule(queue, task, now_millis() + delay.as_millis() as i64)
    }

    /// Atomically remove and return up to `limit` tasks whose due time has
    /// passed, soonest first.
    pub fn poll_due(&self, queue: &str, limit: usize) -> Vec<String> {
        let key = keys::delay_queue(queue);
        let now = now_millis() as f64;
        self.store.update("delay_poll_due", |ks| {
            let due: Vec<String> = ks
                .zset(&key)
                .map(|zset| zset.range_by_score(f64::MIN, now))
                .unwrap_or_default()
                .into_iter()
                .take(limit)
                .collect();
            if !due.is_empty() {
                let zset = ks.zset_mut(&key);
                for task in &due {
                    zset.remove(task);
                }
                ks.prune_if_empty(&key);
            }
            due
        })
    }

    pub fn cancel(&self, queue: &str, task: &str) -> bool {
        self.store.zrem(&keys::delay_queue(queue), task)
    }

    pub fn due_at(&self, queue: &str, task: &str) -> Option<i64> {
        self.store
            .zscore(&keys::delay_queue(queue), task)
            .map(|score| score as i64)
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.store.zcard(&keys::delay_queue(queue))
    }

    pub fn clear(&self, queue: &str) {
        self.store.del(&keys::delay_queue(queue));
    }

    /// Start consuming a queue in a background task. Returns `false` (and
    /// changes nothing) when a consumer for this queue is already running.
    pub fn start(self: &Arc<Self>, queue: &str, handler: Arc<dyn DelayTaskHandler>) -> bool {
        let stop = Arc::new(AtomicBool::new(false));
        match self.consumers.entry(queue.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(queue, target_module = SOURCE, "Consumer already running, ignoring start");
                return false;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&stop));
            }
        }
        let service = Arc::clone(self);
        let queue = queue.to_string();
        tokio::spawn(async move {
            service.consume_loop(&queue, handler, stop).await;
        });
        true
    }

    /// Request the consumer to stop at its next poll boundary.
    pub fn stop(&self, queue: &str) {
        if let Some(flag) = self.consumers.get(queue) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    async fn consume_loop(
        &self,
        queue: &str,
        handler: Arc<dyn DelayTaskHandler>,
        stop: Arc<AtomicBool>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.settings.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(queue, target_module = SOURCE, "Delay-queue consumer started");
        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                self.consumers.remove(queue);
                info!(queue, target_module = SOURCE, "Delay-queue consumer stopped");
                return;
            }
            self.drain_due(queue, handler.as_ref()).await;
            gauge!("tideline_queue_depth", "queue" => queue.to_string())
                .set(self.depth(queue) as f64);
        }
    }

    /// Process one batch of due tasks. Exposed separately from the loop so
    /// the backoff behavior is testable without timers.
    pub(crate) async fn drain_due(&self, queue: &str, handler: &dyn DelayTaskHandler) -> usize {
        let due = self.poll_due(queue, self.settings.batch_size);
        let mut completed = 0;
        for task in due {
            match handler.handle(&task).await {
                Ok(true) => completed += 1,
                Ok(false) => {
                    debug!(queue, task, target_module = SOURCE, "Task not ready, rescheduling");
                    self.schedule_after(
                        queue,
                        &task,
                        Duration::from_millis(self.settings.retry_short_ms),
                    );
                }
                Err(error) => {
                    warn!(queue, task, %error, target_module = SOURCE,
                        "Task handler failed, rescheduling");
                    self.schedule_after(
                        queue,
                        &task,
                        Duration::from_millis(self.settings.retry_long_ms),
                    );
                }
            }
        }
        completed
    }
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn service() -> Arc<DelayQueueService> {
        Arc::new(DelayQueueService::new(
            Arc::new(FastStore::new()),
            DelayQueueSettings {
                poll_interval_ms: 10,
                batch_size: 100,
                retry_short_ms: 1_000,
                retry_long_ms: 5_000,
            },
        ))
    }

    struct Recorder {
        seen: AtomicUsize,
        verdict: fn() -> Result<bool, AppError>,
    }

    #[async_trait]
    impl DelayTaskHandler for Recorder {
        async fn handle(&self, _task: &str) -> Result<bool, AppError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            (self.verdict)()
        }
    }

    #[test]
    fn poll_due_only_returns_elapsed_tasks() {
        let q = service();
        let now = now_millis();
        q.schedule("w", "past", now - 50);
        q.schedule("w", "future", now + 60_000);

        assert_eq!(q.poll_due("w", 10), vec!["past"]);
        assert_eq!(q.depth("w"), 1);
        assert!(q.due_at("w", "future").is_some());
        assert!(q.poll_due("w", 10).is_empty());
    }

    #[test]
    fn cancel_removes_a_pending_task() {
        let q = service();
        q.schedule_after("w", "t", Duration::from_secs(60));
        assert!(q.cancel("w", "t"));
        assert!(!q.cancel("w", "t"));
        assert_eq!(q.depth("w"), 0);
    }

    #[test]
    fn rescheduling_moves_the_due_time() {
        let q = service();
        q.schedule("w", "t", 100);
        q.schedule("w", "t", 200);
        assert_eq!(q.depth("w"), 1);
        assert_eq!(q.due_at("w", "t"), Some(200));
    }

    #[tokio::test]
    async fn not_ready_tasks_come_back_with_the_short_backoff() {
        let q = service();
        let handler = Recorder {
            seen: AtomicUsize::new(0),
            verdict: || Ok(false),
        };
        q.schedule("w", "t", now_millis() - 1);

        assert_eq!(q.drain_due("w", &handler).await, 0);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
        let due = q.due_at("w", "t").unwrap();
        let lead = due - now_millis();
        assert!(lead > 0 && lead <= 1_000, "lead {lead}");
    }

    #[tokio::test]
    async fn failing_tasks_come_back_with_the_long_backoff() {
        let q = service();
        let handler = Recorder {
            seen: AtomicUsize::new(0),
            verdict: || Err(AppError::unexpected("boom")),
        };
        q.schedule("w", "t", now_millis() - 1);

        assert_eq!(q.drain_due("w", &handler).await, 0);
        let due = q.due_at("w", "t").unwrap();
        let lead = due - now_millis();
        assert!(lead > 1_000 && lead <= 5_000, "lead {lead}");
    }

    #[tokio::test]
    async fn completed_tasks_do_not_reappear() {
        let q = service();
        let handler = Recorder {
            seen: AtomicUsize::new(0),
            verdict: || Ok(true),
        };
        q.schedule("w", "t", now_millis() - 1);

        assert_eq!(q.drain_due("w", &handler).await, 1);
        assert_eq!(q.depth("w"), 0);
    }

    #[tokio::test]
    async fn second_start_for_a_queue_is_a_no_op() {
        let q = service();
        let handler: Arc<dyn DelayTaskHandler> = Arc::new(Recorder {
            seen: AtomicUsize::new(0),
            verdict: || Ok(true),
        });
        assert!(q.start("w", Arc::clone(&handler)));
        assert!(!q.start("w", handler));
        q.stop("w");
    }
}
