//! Worker supervisor
//!
//! One supervisor drives one build on one leased VM:
//!
//! ```text
//! Created -> AnnouncingStart -> Preparing -> Building -> Collecting
//!         -> AnnouncingEnd -> Done
//! ```
//!
//! Whatever happens along the way the VM lease is released exactly once when
//! [`WorkerSupervisor::run`] returns, and the lease guard covers panics.

use chrono::Utc;
use kiln_core::domain::event::{EventTopic, LifecycleEvent};
use kiln_core::domain::job::{BuildJob, BuildStatus, JobError};
use kiln_core::domain::vm::{GroupId, VmHandle};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::Config;
use crate::executor::{BuildExecutor, ExecutorError};
use crate::pool::VmLease;
use crate::service::{
    BuildMetrics, CommunicationError, Notifier, ProcessTitle, ResultArchiver, StatusReporter,
};

/// Collaborators shared by every supervisor
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub reporter: Arc<dyn StatusReporter>,
    pub executor: Arc<dyn BuildExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub titles: Arc<dyn ProcessTitle>,
    pub metrics: Arc<BuildMetrics>,
    pub archiver: ResultArchiver,
}

/// Where a supervisor is in the build pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Created,
    AnnouncingStart,
    Preparing,
    Building,
    Collecting,
    AnnouncingEnd,
    Done,
}

/// Failures that end a supervisor's run early
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The frontend does not know the build started, so it never ran
    #[error("Could not communicate to front end to submit status info: {0}")]
    StartAnnouncement(#[source] CommunicationError),

    #[error("Could not communicate to front end to submit results: {0}")]
    EndAnnouncement(#[source] CommunicationError),

    #[error(transparent)]
    Job(#[from] JobError),
}

pub struct WorkerSupervisor {
    worker_id: usize,
    group_name: String,
    ctx: WorkerContext,
    lease: VmLease,
    job: BuildJob,
    phase: WorkerPhase,
}

impl WorkerSupervisor {
    pub fn new(worker_id: usize, ctx: WorkerContext, lease: VmLease, job: BuildJob) -> Self {
        let group_name = resolve_group_name(&ctx.config, lease.vm().group);
        Self {
            worker_id,
            group_name,
            ctx,
            lease,
            job,
            phase: WorkerPhase::Created,
        }
    }

    /// Name used in logs and lifecycle events
    pub fn name(&self) -> String {
        format!("backend.worker-{}-{}", self.worker_id, self.group_name)
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Runs the build to completion and releases the VM
    ///
    /// Returns the finished job descriptor, or the error that cut the
    /// pipeline short. The VM is released in both cases.
    pub async fn run(mut self) -> Result<BuildJob, WorkerError> {
        let span = info_span!(
            "worker",
            name = %self.name(),
            build_id = self.job.build_id,
            chroot = %self.job.chroot
        );

        async move {
            info!("Starting worker");

            let outcome = self.do_job().await;
            if let Err(e) = &outcome {
                error!("Building error: {}", e);
            }

            self.ctx.titles.clear(self.worker_id);
            self.lease.release();

            outcome.map(|()| self.job)
        }
        .instrument(span)
        .await
    }

    async fn do_job(&mut self) -> Result<(), WorkerError> {
        self.enter(WorkerPhase::AnnouncingStart);
        self.announce_start().await?;
        self.update_title(&format!(
            "Task: {} chroot: {} build started",
            self.job.build_id, self.job.chroot
        ));

        self.enter(WorkerPhase::Preparing);
        let mut status = self.prepare();

        if status == BuildStatus::Succeeded {
            self.enter(WorkerPhase::Building);
            self.update_title(&format!(
                "Task: {} chroot: {} building",
                self.job.build_id, self.job.chroot
            ));
            status = self.build().await;
        }

        self.enter(WorkerPhase::Collecting);
        if let Err(e) = self.ctx.archiver.copy_mock_logs(&self.job) {
            error!("Failed to archive build logs: {}", e);
            status = BuildStatus::Failed;
        }

        self.job.set_status(status)?;

        self.enter(WorkerPhase::AnnouncingEnd);
        self.announce_end().await?;

        self.enter(WorkerPhase::Done);
        self.update_title(&format!(
            "Task: {} chroot: {} done",
            self.job.build_id, self.job.chroot
        ));
        Ok(())
    }

    /// Creates the working directory and cleans the results directory
    ///
    /// Cleanup runs even when the directory could not be created.
    fn prepare(&mut self) -> BuildStatus {
        let mut status = BuildStatus::Succeeded;

        if !self.job.chroot_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.job.chroot_dir) {
                error!(
                    "Could not make results dir for job {}: {}",
                    self.job.chroot_dir.display(),
                    e
                );
                status = BuildStatus::Failed;
            }
        }

        if let Err(e) = self.ctx.archiver.clean_result_directory(&self.job) {
            error!("Could not clean results dir: {}", e);
            status = BuildStatus::Failed;
        }

        status
    }

    async fn build(&mut self) -> BuildStatus {
        let vm = self.lease.vm().clone();
        info!(
            "Starting build: id={} builder={} chroot={}",
            self.job.build_id, vm.address, self.job.chroot
        );

        let status = match self.execute(&vm).await {
            Ok(()) => {
                self.ctx.metrics.register_build_result(false);
                BuildStatus::Succeeded
            }
            Err(e) => {
                error!(
                    "Error during the build, host={}, build_id={}, chroot={}, error: {}",
                    vm.address, self.job.build_id, self.job.chroot, e
                );
                if e.is_vm_error() {
                    self.lease.flag_for_check();
                }
                self.ctx.metrics.register_build_result(true);
                BuildStatus::Failed
            }
        };

        info!(
            "Finished build: id={} builder={} timeout={} destdir={} chroot={} repos={:?}",
            self.job.build_id,
            vm.address,
            self.job.timeout,
            self.job.destdir.display(),
            self.job.chroot,
            self.job.repos
        );

        status
    }

    async fn execute(&mut self, vm: &VmHandle) -> Result<(), ExecutorError> {
        let executor = Arc::clone(&self.ctx.executor);

        executor.check(vm, &self.job).await?;
        let details = executor.build(vm, &self.job).await?;
        self.job.apply(details);

        if self.ctx.config.do_sign {
            executor.add_pubkey(vm, &self.job).await?;
        }
        Ok(())
    }

    async fn announce_start(&mut self) -> Result<(), WorkerError> {
        self.job.mark_started(Utc::now())?;
        self.job.set_status(BuildStatus::Running)?;

        let snapshot = self.job.snapshot();
        info!("starting build: {:?}", snapshot);
        self.ctx
            .reporter
            .update(vec![snapshot])
            .await
            .map_err(WorkerError::StartAnnouncement)?;

        self.notify(EventTopic::BuildStart).await;
        self.notify(EventTopic::ChrootStart).await;
        Ok(())
    }

    async fn announce_end(&mut self) -> Result<(), WorkerError> {
        self.job.mark_ended(Utc::now())?;

        info!(
            "Build {} finished with status {}. Took {} seconds",
            self.job.build_id,
            self.job.status(),
            self.job.duration().map(|d| d.num_seconds()).unwrap_or(0)
        );
        self.ctx
            .reporter
            .update(vec![self.job.snapshot()])
            .await
            .map_err(WorkerError::EndAnnouncement)?;

        info!("worker finished build: {}", self.lease.vm().address);
        self.notify(EventTopic::BuildEnd).await;
        Ok(())
    }

    async fn notify(&self, topic: EventTopic) {
        let event = LifecycleEvent::new(
            topic,
            self.name(),
            self.worker_id,
            &self.job,
            self.lease.vm(),
        );
        if let Err(e) = self.ctx.notifier.publish(&event).await {
            warn!("failed to publish message: {}", e);
        }
    }

    fn update_title(&self, suffix: &str) {
        let vm = self.lease.vm();
        let title = format!(
            "Worker-{}-{} vm.vm_ip={} vm.vm_name={} {}",
            self.worker_id, self.group_name, vm.address, vm.name, suffix
        );
        self.ctx.titles.set(self.worker_id, &title);
    }

    fn enter(&mut self, phase: WorkerPhase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

fn resolve_group_name(config: &Config, group: GroupId) -> String {
    match config.group_name(group) {
        Some(name) => name.to_string(),
        None => {
            warn!(
                "Failed to get builder group name from config, using group_id {} as name",
                group
            );
            group.to_string()
        }
    }
}
