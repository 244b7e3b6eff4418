//! Infrastructure: telemetry and the Postgres-backed durable store.

pub mod db;
pub mod error;
pub mod telemetry;
