//! Scheduler layer for the worker
//!
//! This layer pairs build requests with leased VMs and supervises each build
//! from its start announcement to the release of its VM.

pub mod dispatcher;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DispatchError, Dispatcher};
pub use supervisor::{WorkerContext, WorkerError, WorkerPhase, WorkerSupervisor};
