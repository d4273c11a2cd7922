//! Fakes for supervisor and dispatcher tests

use async_trait::async_trait;
use kiln_client::ClientError;
use kiln_core::domain::event::{EventTopic, LifecycleEvent};
use kiln_core::domain::job::{BuildJob, BuildResult, BuildStatus};
use kiln_core::domain::vm::{GroupId, VmHandle};
use kiln_core::dto::build::{BuildRequest, BuildSnapshot};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::executor::{BuildExecutor, ExecutorError};
use crate::pool::{PoolError, VmManager};
use crate::service::{
    BuildMetrics, CommunicationError, Notifier, NotifyError, ProcessTitle, ResultArchiver,
    StatusReporter,
};

use super::WorkerContext;

pub fn request(build_id: u64) -> BuildRequest {
    BuildRequest {
        build_id,
        project_owner: "alice".to_string(),
        project_name: "tools".to_string(),
        submitter: Some("alice".to_string()),
        package_name: "hello".to_string(),
        package_version: None,
        source_url: "https://example.com/hello-1.0-1.src.rpm".to_string(),
        chroot: "fedora-39-x86_64".to_string(),
        repos: vec![],
        enable_net: false,
        timeout: 60,
    }
}

pub fn job(destdir: &Path) -> BuildJob {
    BuildJob::from_request(request(1), destdir).unwrap()
}

pub fn vm() -> VmHandle {
    VmHandle::new("x86-0", "10.0.0.1", GroupId(0))
}

/// Reporter recording every snapshot, failing on the calls listed in `fail_on`
#[derive(Default)]
pub struct RecordingReporter {
    pub snapshots: Mutex<Vec<BuildSnapshot>>,
    pub fail_on: Vec<usize>,
    calls: AtomicUsize,
}

impl RecordingReporter {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.to_vec(),
            ..Default::default()
        }
    }

    pub fn statuses(&self) -> Vec<BuildStatus> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.status)
            .collect()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn update(&self, builds: Vec<BuildSnapshot>) -> Result<(), CommunicationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&call) {
            return Err(CommunicationError(ClientError::api_error(503, "unavailable")));
        }
        self.snapshots.lock().unwrap().extend(builds);
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    FailBuild,
    FailVm,
    Panic,
}

/// Executor following a fixed script
///
/// Before answering `build` it writes a transcript into the chroot log and
/// creates the results directory, like a real remote build would.
pub struct ScriptedExecutor {
    pub script: Script,
    pub checks: AtomicUsize,
    pub builds: AtomicUsize,
    pub pubkeys: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            checks: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            pubkeys: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BuildExecutor for ScriptedExecutor {
    async fn check(&self, _vm: &VmHandle, _job: &BuildJob) -> Result<(), ExecutorError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::FailVm => Err(ExecutorError::Vm("ssh: connect timed out".to_string())),
            _ => Ok(()),
        }
    }

    async fn build(&self, _vm: &VmHandle, job: &BuildJob) -> Result<BuildResult, ExecutorError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(&job.results_dir)?;
        std::fs::write(&job.chroot_log_path, "mock output\n")?;

        match self.script {
            Script::Succeed => Ok(BuildResult {
                package_version: Some("1.0-1".to_string()),
                built_packages: vec!["hello-1.0-1.fc39.x86_64.rpm".to_string()],
                repos: vec![],
            }),
            Script::FailBuild => Err(ExecutorError::Build("rpmbuild failed".to_string())),
            Script::FailVm => Err(ExecutorError::Vm("unreachable".to_string())),
            Script::Panic => panic!("executor blew up"),
        }
    }

    async fn add_pubkey(&self, _vm: &VmHandle, _job: &BuildJob) -> Result<(), ExecutorError> {
        self.pubkeys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// VM manager counting releases per VM name
#[derive(Default)]
pub struct CountingVmManager {
    pub releases: Mutex<HashMap<String, usize>>,
    pub flagged: Mutex<Vec<String>>,
}

impl CountingVmManager {
    pub fn releases_of(&self, name: &str) -> usize {
        self.releases.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl VmManager for CountingVmManager {
    async fn acquire(&self, _group: GroupId, holder: &str) -> Result<VmHandle, PoolError> {
        let mut vm = vm();
        vm.holder = Some(holder.to_string());
        Ok(vm)
    }

    fn release(&self, vm: &VmHandle) -> bool {
        *self
            .releases
            .lock()
            .unwrap()
            .entry(vm.name.clone())
            .or_default() += 1;
        true
    }

    fn flag_for_check(&self, vm_name: &str) {
        self.flagged.lock().unwrap().push(vm_name.to_string());
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub topics: Mutex<Vec<EventTopic>>,
    pub fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), NotifyError> {
        self.topics.lock().unwrap().push(event.topic);
        if self.fail {
            return Err(NotifyError::Refused(500));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTitle {
    pub titles: Mutex<Vec<String>>,
    pub cleared: AtomicUsize,
}

impl ProcessTitle for RecordingTitle {
    fn set(&self, _worker_id: usize, title: &str) {
        self.titles.lock().unwrap().push(title.to_string());
    }

    fn clear(&self, _worker_id: usize) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wires a worker context around the given fakes
pub fn context(
    config: Config,
    reporter: Arc<RecordingReporter>,
    executor: Arc<ScriptedExecutor>,
    notifier: Arc<RecordingNotifier>,
    titles: Arc<RecordingTitle>,
) -> WorkerContext {
    WorkerContext {
        config: Arc::new(config),
        reporter,
        executor,
        notifier,
        titles,
        metrics: Arc::new(BuildMetrics::new().unwrap()),
        archiver: ResultArchiver::new(),
    }
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.pool = serde_json::from_value(serde_json::json!({
        "groups": [{"id": 0, "name": "x86", "archs": ["x86_64"]}],
        "vms": [{"name": "x86-0", "address": "10.0.0.1", "group": 0}]
    }))
    .unwrap();
    config
}
