//! Tideline: the caching, ranking, and consistency core of a social-content
//! platform.
//!
//! Live relationship state (follows, likes, favorites, blocks), rankings, and
//! timelines are held in an in-process fast store and persisted to Postgres
//! with per-kind write policies. A scheduled reconciliation sweep repairs the
//! durable store against the fast store, which is authoritative.

pub mod application;
pub mod config;
pub mod domain;
pub mod fast;
pub mod infra;
pub mod util;
