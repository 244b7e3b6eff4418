//! FIFO queue over a fast-store list.
//!
//! Also serves as the dead-letter target: a consumer that gives up on a
//! delayed task after its own retry budget pushes the payload onto a named
//! dead-letter queue.

use std::sync::Arc;

use metrics::gauge;

use crate::fast::FastStore;
use crate::util::keys;

pub struct FifoQueueService {
    store: Arc<FastStore>,
}

impl FifoQueueService {
    pub fn new(store: Arc<FastStore>) -> Self {
        Self { store }
    }

    /// Append a message; returns the resulting depth.
    pub fn send(&self, queue: &str, message: &str) -> usize {
        let depth = self.store.lpush(&keys::fifo_queue(queue), message);
        gauge!("tideline_queue_depth", "queue" => queue.to_string()).set(depth as f64);
        depth
    }

    pub fn send_many<'a>(&self, queue: &str, messages: impl IntoIterator<Item = &'a str>) -> usize {
        let key = keys::fifo_queue(queue);
        let depth = self.store.update("fifo_send_many", |ks| {
            let list = ks.list_mut(&key);
            for message in messages {
                list.push_front(message.to_string());
            }
            list.len()
        });
        gauge!("tideline_queue_depth", "queue" => queue.to_string()).set(depth as f64);
        depth
    }

    /// Pop the oldest message.
    pub fn receive(&self, queue: &str) -> Option<String> {
        self.store.rpop(&keys::fifo_queue(queue))
    }

    /// Pop up to `max` of the oldest messages, oldest first.
    pub fn receive_many(&self, queue: &str, max: usize) -> Vec<String> {
        let key = keys::fifo_queue(queue);
        self.store.update("fifo_receive_many", |ks| {
            let list = ks.list_mut(&key);
            let take = max.min(list.len());
            let mut drained = Vec::with_capacity(take);
            for _ in 0..take {
                if let Some(message) = list.pop_back() {
                    drained.push(message);
                }
            }
            ks.prune_if_empty(&key);
            drained
        })
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.store.llen(&keys::fifo_queue(queue))
    }

    pub fn clear(&self, queue: &str) {
        self.store.del(&keys::fifo_queue(queue));
    }
}
