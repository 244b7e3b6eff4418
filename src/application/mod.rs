//! Application services: mutation, ranking, timelines, persistence policies,
//! reconciliation, and queue primitives.

pub mod error;
pub mod history;
pub mod notify;
pub mod persistence;
pub mod queues;
pub mod ranking;
pub mod reconcile;
pub mod relations;
pub mod repos;
pub mod timeline;
