//! Build DTOs for communication with the frontend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::BuildStatus;

/// A queued build request, as handed over by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub build_id: u64,
    pub project_owner: String,
    pub project_name: String,
    #[serde(default)]
    pub submitter: Option<String>,
    pub package_name: String,
    #[serde(default)]
    pub package_version: Option<String>,
    pub source_url: String,
    pub chroot: String,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub enable_net: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    3600
}

/// Flat record of a build as displayed by the frontend
///
/// Timestamps travel as Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSnapshot {
    pub id: u64,
    pub status: BuildStatus,
    pub chroot: String,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub started_on: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub ended_on: Option<DateTime<Utc>>,
    pub project_owner: String,
    pub project_name: String,
    pub submitter: Option<String>,
    pub package_name: String,
    pub package_version: Option<String>,
    pub built_packages: Vec<String>,
    /// Results directory on the backend
    pub results: String,
}

/// Body of the frontend's `update` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub builds: Vec<BuildSnapshot>,
}

impl From<BuildSnapshot> for UpdateRequest {
    fn from(snapshot: BuildSnapshot) -> Self {
        Self {
            builds: vec![snapshot],
        }
    }
}
