//! Build executor boundary
//!
//! The remote build protocol lives outside this crate. The worker only needs
//! a pre-flight check, the build itself and, for signed deployments, the
//! publication of the signing key.

mod command;

pub use command::CommandExecutor;

use async_trait::async_trait;
use kiln_core::domain::job::{BuildJob, BuildResult};
use kiln_core::domain::vm::VmHandle;
use std::time::Duration;
use thiserror::Error;

/// Typed failures of the build executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The build ran and failed
    #[error("Build failed: {0}")]
    Build(String),

    /// The builder machine itself misbehaved (unreachable, misconfigured)
    #[error("Builder VM error: {0}")]
    Vm(String),

    #[error("Build timed out after {0:?}")]
    Timeout(Duration),

    #[error("Executor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether the VM should be health-checked before being reused
    pub fn is_vm_error(&self) -> bool {
        matches!(self, ExecutorError::Vm(_))
    }
}

/// Service trait for running a build on a leased VM
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Validates that `vm` can build `job`
    async fn check(&self, vm: &VmHandle, job: &BuildJob) -> Result<(), ExecutorError>;

    /// Builds the package and collects the results
    async fn build(&self, vm: &VmHandle, job: &BuildJob) -> Result<BuildResult, ExecutorError>;

    /// Publishes the project's signing key next to the results
    async fn add_pubkey(&self, vm: &VmHandle, job: &BuildJob) -> Result<(), ExecutorError>;
}
