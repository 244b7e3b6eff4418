//! In-process fast store.
//!
//! A typed keyspace of sets, sorted sets, lists, and counters behind one
//! poison-recovering `RwLock`. Multi-key mutations run as a single closure
//! under the write guard, so paired indices are never observable half-applied.

mod keyspace;
pub(crate) mod lock;
mod store;
mod zset;

pub use keyspace::{Keyspace, Value};
pub use store::FastStore;
pub use zset::{Aggregate, SortedSet};
