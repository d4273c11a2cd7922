//! Build job domain types
//!
//! A [`BuildJob`] is the descriptor of one request to build a single package
//! for one chroot. It is created by the dispatcher from a queued
//! [`BuildRequest`](crate::dto::build::BuildRequest) and afterwards mutated
//! only by the worker supervising it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::dto::build::{BuildRequest, BuildSnapshot};

/// Build status as seen by the frontend
///
/// Statuses only ever move forward: `Pending -> Starting -> Running` and then
/// into exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    fn rank(self) -> u8 {
        match self {
            BuildStatus::Pending => 0,
            BuildStatus::Starting => 1,
            BuildStatus::Running => 2,
            BuildStatus::Succeeded | BuildStatus::Failed => 3,
        }
    }

    /// Returns true for `Succeeded` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed)
    }

    /// Checks whether moving from `self` to `next` keeps the walk monotonic
    pub fn can_advance_to(self, next: BuildStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Starting => write!(f, "starting"),
            BuildStatus::Running => write!(f, "running"),
            BuildStatus::Succeeded => write!(f, "succeeded"),
            BuildStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Violations of the job descriptor invariants
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("build {build_id}: status cannot move from {from} to {to}")]
    StatusRegression {
        build_id: u64,
        from: BuildStatus,
        to: BuildStatus,
    },

    #[error("build {0}: start time already recorded")]
    AlreadyStarted(u64),

    #[error("build {0}: end time already recorded")]
    AlreadyEnded(u64),

    #[error("build {0}: cannot record an end time before the start time")]
    NotStarted(u64),

    #[error("build {build_id}: {field} {value:?} is not a plain path component")]
    UnsafePath {
        build_id: u64,
        field: &'static str,
        value: String,
    },
}

/// Structured output of a successful remote build
///
/// Merged into the [`BuildJob`] via [`BuildJob::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Version resolved from the built source package
    #[serde(default)]
    pub package_version: Option<String>,
    /// File names of the produced packages
    #[serde(default)]
    pub built_packages: Vec<String>,
    /// Repositories the results were published to
    #[serde(default)]
    pub repos: Vec<String>,
}

/// Descriptor of one build request for one chroot
#[derive(Debug, Clone, Serialize)]
pub struct BuildJob {
    pub build_id: u64,
    pub project_owner: String,
    pub project_name: String,
    pub submitter: Option<String>,
    pub package_name: String,
    pub package_version: Option<String>,
    /// URL of the source package to build
    pub source_url: String,
    pub chroot: String,
    /// Extra repositories enabled inside the chroot
    pub repos: Vec<String>,
    pub enable_net: bool,
    /// Build timeout in seconds
    pub timeout: u64,
    pub built_packages: Vec<String>,

    pub destdir: PathBuf,
    pub chroot_dir: PathBuf,
    pub results_dir: PathBuf,
    pub chroot_log_name: String,
    pub rsync_log_name: String,
    pub chroot_log_path: PathBuf,

    status: BuildStatus,
    started_on: Option<DateTime<Utc>>,
    ended_on: Option<DateTime<Utc>>,
}

impl BuildJob {
    /// Builds a job descriptor from a queued request, deriving all paths
    /// below `destdir`
    ///
    /// Owner, project, chroot and package name end up in filesystem paths,
    /// so each must be a single plain path component.
    pub fn from_request(req: BuildRequest, destdir: impl AsRef<Path>) -> Result<Self, JobError> {
        for (field, value) in [
            ("project_owner", &req.project_owner),
            ("project_name", &req.project_name),
            ("chroot", &req.chroot),
            ("package_name", &req.package_name),
        ] {
            if !is_plain_component(value) {
                return Err(JobError::UnsafePath {
                    build_id: req.build_id,
                    field,
                    value: value.clone(),
                });
            }
        }

        let destdir = destdir.as_ref().to_path_buf();
        let chroot_dir = destdir.join(&req.chroot);
        let results_dir = chroot_dir.join(format!("{:08}-{}", req.build_id, req.package_name));
        let chroot_log_name = format!("build-{:08}.log", req.build_id);
        let rsync_log_name = format!("build-{:08}.rsync.log", req.build_id);
        let chroot_log_path = chroot_dir.join(&chroot_log_name);

        Ok(Self {
            build_id: req.build_id,
            project_owner: req.project_owner,
            project_name: req.project_name,
            submitter: req.submitter,
            package_name: req.package_name,
            package_version: req.package_version,
            source_url: req.source_url,
            chroot: req.chroot,
            repos: req.repos,
            enable_net: req.enable_net,
            timeout: req.timeout,
            built_packages: Vec::new(),
            destdir,
            chroot_dir,
            results_dir,
            chroot_log_name,
            rsync_log_name,
            chroot_log_path,
            status: BuildStatus::Pending,
            started_on: None,
            ended_on: None,
        })
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn started_on(&self) -> Option<DateTime<Utc>> {
        self.started_on
    }

    pub fn ended_on(&self) -> Option<DateTime<Utc>> {
        self.ended_on
    }

    /// Architecture of the chroot, taken from its last dash-separated part
    /// (`fedora-39-x86_64` -> `x86_64`)
    pub fn arch(&self) -> &str {
        self.chroot.rsplit('-').next().unwrap_or(&self.chroot)
    }

    /// Moves the job to `next`, refusing to go backwards
    pub fn set_status(&mut self, next: BuildStatus) -> Result<(), JobError> {
        if !self.status.can_advance_to(next) {
            return Err(JobError::StatusRegression {
                build_id: self.build_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records the start time; can only happen once
    pub fn mark_started(&mut self, at: DateTime<Utc>) -> Result<(), JobError> {
        if self.started_on.is_some() {
            return Err(JobError::AlreadyStarted(self.build_id));
        }
        self.started_on = Some(at);
        Ok(())
    }

    /// Records the end time; can only happen once and only after a start
    ///
    /// A clock that went backwards is clamped so that `ended_on >= started_on`.
    pub fn mark_ended(&mut self, at: DateTime<Utc>) -> Result<(), JobError> {
        let started = self.started_on.ok_or(JobError::NotStarted(self.build_id))?;
        if self.ended_on.is_some() {
            return Err(JobError::AlreadyEnded(self.build_id));
        }
        self.ended_on = Some(at.max(started));
        Ok(())
    }

    /// Wall-clock duration of the build, once both timestamps are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_on? - self.started_on?)
    }

    /// Merges the executor's result into the descriptor
    pub fn apply(&mut self, result: BuildResult) {
        if result.package_version.is_some() {
            self.package_version = result.package_version;
        }
        self.built_packages = result.built_packages;
        if !result.repos.is_empty() {
            self.repos = result.repos;
        }
    }

    /// Flat view of the job sent to the frontend
    pub fn snapshot(&self) -> BuildSnapshot {
        BuildSnapshot {
            id: self.build_id,
            status: self.status,
            chroot: self.chroot.clone(),
            started_on: self.started_on,
            ended_on: self.ended_on,
            project_owner: self.project_owner.clone(),
            project_name: self.project_name.clone(),
            submitter: self.submitter.clone(),
            package_name: self.package_name.clone(),
            package_version: self.package_version.clone(),
            built_packages: self.built_packages.clone(),
            results: self.results_dir.to_string_lossy().to_string(),
        }
    }
}

fn is_plain_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}
