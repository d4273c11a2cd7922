//! Lifecycle events published on the notification side channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{BuildJob, BuildStatus};
use crate::domain::vm::VmHandle;

/// Topic of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTopic {
    #[serde(rename = "build.start")]
    BuildStart,
    #[serde(rename = "chroot.start")]
    ChrootStart,
    #[serde(rename = "build.end")]
    BuildEnd,
}

impl EventTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            EventTopic::BuildStart => "build.start",
            EventTopic::ChrootStart => "chroot.start",
            EventTopic::BuildEnd => "build.end",
        }
    }
}

/// Structured record of a build lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub topic: EventTopic,
    pub timestamp: DateTime<Utc>,
    /// Name of the worker emitting the event
    pub who: String,
    pub user: Option<String>,
    pub owner: String,
    pub copr: String,
    pub pkg: String,
    pub version: Option<String>,
    pub build: u64,
    pub chroot: String,
    pub ip: String,
    pub worker: usize,
    pub status: Option<BuildStatus>,
}

impl LifecycleEvent {
    /// Creates an event describing `job` running on `vm`
    pub fn new(
        topic: EventTopic,
        who: impl Into<String>,
        worker: usize,
        job: &BuildJob,
        vm: &VmHandle,
    ) -> Self {
        let status = match topic {
            EventTopic::BuildEnd => Some(job.status()),
            _ => None,
        };

        Self {
            id: Uuid::new_v4(),
            topic,
            timestamp: Utc::now(),
            who: who.into(),
            user: job.submitter.clone(),
            owner: job.project_owner.clone(),
            copr: job.project_name.clone(),
            pkg: job.package_name.clone(),
            version: job.package_version.clone(),
            build: job.build_id,
            chroot: job.chroot.clone(),
            ip: vm.address.clone(),
            worker,
            status,
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let user = self.user.as_deref().unwrap_or("-");
        match self.topic {
            EventTopic::BuildStart => write!(
                f,
                "build start: user:{} copr:{} pkg:{} build:{} ip:{} worker:{}",
                user, self.copr, self.pkg, self.build, self.ip, self.worker
            ),
            EventTopic::ChrootStart => write!(
                f,
                "chroot start: chroot:{} user:{} copr:{} pkg:{} build:{} ip:{} worker:{}",
                self.chroot, user, self.copr, self.pkg, self.build, self.ip, self.worker
            ),
            EventTopic::BuildEnd => write!(
                f,
                "build end: user:{} copr:{} build:{} pkg:{} version:{} ip:{} worker:{} status:{}",
                user,
                self.copr,
                self.build,
                self.pkg,
                self.version.as_deref().unwrap_or("-"),
                self.ip,
                self.worker,
                self.status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vm::GroupId;
    use crate::dto::build::BuildRequest;

    #[test]
    fn test_end_event_carries_status() {
        let mut job = BuildJob::from_request(
            BuildRequest {
                build_id: 3,
                project_owner: "carol".to_string(),
                project_name: "libs".to_string(),
                submitter: None,
                package_name: "zlib".to_string(),
                package_version: Some("1.3-1".to_string()),
                source_url: "https://example.com/zlib.src.rpm".to_string(),
                chroot: "fedora-40-x86_64".to_string(),
                repos: vec![],
                enable_net: false,
                timeout: 60,
            },
            "/tmp",
        )
        .unwrap();
        job.set_status(BuildStatus::Failed).unwrap();
        let vm = VmHandle::new("vm-1", "10.0.0.5", GroupId(0));

        let start = LifecycleEvent::new(EventTopic::BuildStart, "worker-1-x86", 1, &job, &vm);
        assert!(start.status.is_none());

        let end = LifecycleEvent::new(EventTopic::BuildEnd, "worker-1-x86", 1, &job, &vm);
        assert_eq!(end.status, Some(BuildStatus::Failed));
        assert!(end.to_string().contains("status:failed"));

        let value = serde_json::to_value(&end).unwrap();
        assert_eq!(value["topic"], "build.end");
        assert_eq!(value["ip"], "10.0.0.5");
    }
}
