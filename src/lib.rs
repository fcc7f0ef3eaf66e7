//! Test inventory collector library.
//!
//! Consumes `analysis:analyze` tasks from a Redis queue, clones the
//! repository, runs the test scanner and stores the resulting inventory in
//! PostgreSQL. A separate scheduler re-enqueues stale codebases.

pub mod config;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod migration;
pub mod models;
pub mod queue;
pub mod services;
pub mod shutdown;
pub mod telemetry;
