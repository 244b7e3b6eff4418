//! Queue primitives over the fast store: a due-time delay queue and a FIFO
//! list queue.

pub mod delay;
pub mod fifo;

pub use delay::{DelayQueueService, DelayTaskHandler};
pub use fifo::FifoQueueService;
