//! Kiln Worker
//!
//! Build-orchestration core of the Kiln backend.
//!
//! Architecture:
//! - Configuration: frontend connection, results root, builder pool
//! - Pool: leases builder VMs by group and reclaims them
//! - Executor: boundary to the remote build protocol
//! - Services: result archiving, status reporting, notifications, titles,
//!   counters
//! - Scheduler: dispatching and per-build worker supervision

pub mod config;
pub mod executor;
pub mod pool;
pub mod scheduler;
pub mod service;
