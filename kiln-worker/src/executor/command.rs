//! Command-based build executor
//!
//! Drives the remote build through an external program:
//!
//! ```text
//! <program> [args..] <check|build|add-pubkey> --host <address> --job <json>
//! ```
//!
//! Output of every invocation is appended to the job's chroot log. `build`
//! prints a JSON [`BuildResult`] on stdout. Exit code 255 is reserved for
//! connection problems with the builder (ssh convention).

use async_trait::async_trait;
use kiln_core::domain::job::{BuildJob, BuildResult};
use kiln_core::domain::vm::VmHandle;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{BuildExecutor, ExecutorError};

const VM_FAILURE_EXIT_CODE: i32 = 255;

pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    /// Creates an executor from a command line such as `kiln-build --verbose`
    pub fn new(command_line: &str, timeout: Duration) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
            timeout,
        }
    }

    fn limit_for(&self, job: &BuildJob) -> Duration {
        if job.timeout == 0 {
            self.timeout
        } else {
            self.timeout.min(Duration::from_secs(job.timeout))
        }
    }

    async fn run(
        &self,
        action: &str,
        vm: &VmHandle,
        job: &BuildJob,
    ) -> Result<String, ExecutorError> {
        let job_json = serde_json::to_string(job)
            .map_err(|e| ExecutorError::Build(format!("Failed to serialize job: {}", e)))?;

        debug!(
            "Running {} {} for build {} on {}",
            self.program, action, job.build_id, vm.address
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(action)
            .arg("--host")
            .arg(&vm.address)
            .arg("--job")
            .arg(job_json)
            .kill_on_drop(true);

        let limit = self.limit_for(job);
        let output = match tokio::time::timeout(limit, command.output()).await {
            Ok(output) => output?,
            Err(_) => return Err(ExecutorError::Timeout(limit)),
        };

        if let Err(e) = append_log(&job.chroot_log_path, action, &output).await {
            warn!(
                "Failed to write build log {}: {}",
                job.chroot_log_path.display(),
                e
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = format!(
            "{} exited with code {}: {}",
            action,
            exit_code,
            stderr.trim()
        );

        if exit_code == VM_FAILURE_EXIT_CODE {
            Err(ExecutorError::Vm(message))
        } else {
            Err(ExecutorError::Build(message))
        }
    }
}

async fn append_log(path: &Path, action: &str, output: &Output) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let header = format!(
        "==> {} [{}] exit={}\n",
        action,
        chrono::Utc::now().to_rfc3339(),
        output.status.code().unwrap_or(-1)
    );
    file.write_all(header.as_bytes()).await?;
    file.write_all(&output.stdout).await?;
    file.write_all(&output.stderr).await?;
    file.flush().await
}

#[async_trait]
impl BuildExecutor for CommandExecutor {
    async fn check(&self, vm: &VmHandle, job: &BuildJob) -> Result<(), ExecutorError> {
        self.run("check", vm, job).await.map(|_| ())
    }

    async fn build(&self, vm: &VmHandle, job: &BuildJob) -> Result<BuildResult, ExecutorError> {
        let stdout = self.run("build", vm, job).await?;
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(BuildResult::default());
        }

        serde_json::from_str(stdout)
            .map_err(|e| ExecutorError::Build(format!("Invalid build result: {}", e)))
    }

    async fn add_pubkey(&self, vm: &VmHandle, job: &BuildJob) -> Result<(), ExecutorError> {
        self.run("add-pubkey", vm, job).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::domain::vm::GroupId;
    use kiln_core::dto::build::BuildRequest;

    fn job(destdir: &Path) -> BuildJob {
        let job = BuildJob::from_request(
            BuildRequest {
                build_id: 9,
                project_owner: "alice".to_string(),
                project_name: "tools".to_string(),
                submitter: None,
                package_name: "hello".to_string(),
                package_version: None,
                source_url: "https://example.com/hello.src.rpm".to_string(),
                chroot: "fedora-39-x86_64".to_string(),
                repos: vec![],
                enable_net: false,
                timeout: 60,
            },
            destdir,
        )
        .unwrap();
        std::fs::create_dir_all(&job.chroot_dir).unwrap();
        job
    }

    /// Executor running `script` through `sh`
    fn executor(dir: &Path, script: &str, timeout: Duration) -> CommandExecutor {
        let path = dir.join("executor.sh");
        std::fs::write(&path, script).unwrap();
        CommandExecutor::new(&format!("sh {}", path.display()), timeout)
    }

    fn vm() -> VmHandle {
        VmHandle::new("x86-0", "10.0.0.1", GroupId(0))
    }

    #[tokio::test]
    async fn test_build_parses_result_and_logs_output() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job(tmp.path());
        let executor = executor(
            tmp.path(),
            r#"echo "building on $3" >&2
echo '{"package_version": "1.0-1", "built_packages": ["hello-1.0-1.rpm"]}'"#,
            Duration::from_secs(10),
        );

        let result = executor.build(&vm(), &job).await.unwrap();
        assert_eq!(result.package_version.as_deref(), Some("1.0-1"));
        assert_eq!(result.built_packages, vec!["hello-1.0-1.rpm"]);

        let log = std::fs::read_to_string(&job.chroot_log_path).unwrap();
        assert!(log.contains("==> build"));
        assert!(log.contains("building on 10.0.0.1"));
    }

    #[tokio::test]
    async fn test_exit_codes_are_classified() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job(tmp.path());

        let unreachable = executor(tmp.path(), "exit 255", Duration::from_secs(10));
        let err = unreachable.check(&vm(), &job).await.unwrap_err();
        assert!(err.is_vm_error());

        let broken = executor(
            tmp.path(),
            "echo 'missing BuildRequires' >&2; exit 1",
            Duration::from_secs(10),
        );
        let err = broken.build(&vm(), &job).await.unwrap_err();
        assert!(!err.is_vm_error());
        assert!(err.to_string().contains("missing BuildRequires"));
    }

    #[tokio::test]
    async fn test_build_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job(tmp.path());
        let slow = executor(tmp.path(), "sleep 5", Duration::from_millis(100));

        let err = slow.build(&vm(), &job).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job(tmp.path());
        let missing = CommandExecutor::new("/nonexistent/kiln-build", Duration::from_secs(1));

        let err = missing.check(&vm(), &job).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Io(_)));
    }
}
