//! Job dispatcher
//!
//! Pairs each build request with a VM of the matching builder group and
//! starts a [`WorkerSupervisor`] for it in its own task. A panic inside one
//! supervisor stays inside its task.

use kiln_core::domain::job::{BuildJob, JobError};
use kiln_core::dto::build::BuildRequest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pool::{PoolError, VmLease, VmManager};

use super::supervisor::{WorkerContext, WorkerError, WorkerSupervisor};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No builder group serves chroot {0}")]
    NoBuildGroup(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Dispatcher is shutting down")]
    Closed,

    #[error("Invalid build request: {0}")]
    InvalidRequest(#[from] JobError),
}

impl DispatchError {
    /// Whether trying again later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Pool(PoolError::NoVmAvailable { .. }))
    }
}

pub struct Dispatcher {
    ctx: WorkerContext,
    pool: Arc<dyn VmManager>,
    semaphore: Arc<Semaphore>,
    next_worker_id: AtomicUsize,
}

impl Dispatcher {
    pub fn new(ctx: WorkerContext, pool: Arc<dyn VmManager>) -> Self {
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_workers));
        Self {
            ctx,
            pool,
            semaphore,
            next_worker_id: AtomicUsize::new(0),
        }
    }

    /// Leases a VM for `req` and spawns its supervisor
    ///
    /// Waits for a free worker slot first. Pool exhaustion is returned to the
    /// caller, which decides whether to retry.
    pub async fn dispatch(
        &self,
        req: BuildRequest,
    ) -> Result<JoinHandle<Result<BuildJob, WorkerError>>, DispatchError> {
        let destdir = self
            .ctx
            .config
            .destdir
            .join(&req.project_owner)
            .join(&req.project_name);
        let job = BuildJob::from_request(req, destdir)?;

        let group = self
            .ctx
            .config
            .group_for_arch(job.arch())
            .ok_or_else(|| DispatchError::NoBuildGroup(job.chroot.clone()))?;

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Closed)?;

        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1;
        let lease = VmLease::acquire(
            Arc::clone(&self.pool),
            group,
            &format!("worker-{}", worker_id),
        )
        .await?;

        info!(
            "Dispatching build {} ({}) to VM {} as worker {}",
            job.build_id,
            job.chroot,
            lease.vm().name,
            worker_id
        );

        let supervisor = WorkerSupervisor::new(worker_id, self.ctx.clone(), lease, job);
        Ok(tokio::spawn(async move {
            let outcome = supervisor.run().await;
            // Permit is released once the supervisor is done
            drop(permit);
            debug!("Worker {} finished", worker_id);
            outcome
        }))
    }

    /// Stops handing out worker slots
    pub fn close(&self) {
        self.semaphore.close();
    }
}
