//! Backend worker configuration
//!
//! Defines the frontend connection, the results root, the builder groups and
//! the provisioned VM inventory, plus the knobs of the build pipeline.

use anyhow::Context;
use kiln_core::domain::vm::GroupId;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_FRONTEND_URL: &str = "http://localhost:5000";

/// A named group of builders, usually one per architecture
#[derive(Debug, Clone, Deserialize)]
pub struct BuildGroup {
    pub id: GroupId,
    pub name: String,
    /// Chroot architectures this group can build
    #[serde(default)]
    pub archs: Vec<String>,
}

/// One provisioned builder VM
#[derive(Debug, Clone, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub address: String,
    pub group: GroupId,
}

/// Builder groups and VM inventory, usually read from `POOL_FILE`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub groups: Vec<BuildGroup>,
    #[serde(default)]
    pub vms: Vec<VmSpec>,
}

impl PoolConfig {
    /// Reads a pool description from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pool file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse pool file {}", path.display()))
    }
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend base URL (e.g., "http://localhost:5000")
    pub frontend_url: String,

    /// Password for the frontend's backend endpoints
    pub frontend_auth: Option<String>,

    /// Root of the results tree
    pub destdir: PathBuf,

    /// Builder groups and VMs
    pub pool: PoolConfig,

    /// How long `acquire` may wait for a free VM; zero fails immediately
    pub vm_acquire_timeout: Duration,

    /// Max concurrently supervised builds
    pub max_workers: usize,

    /// Whether the signing public key is published after a successful build
    pub do_sign: bool,

    /// Endpoint for lifecycle notifications; unset disables them
    pub notify_url: Option<String>,

    /// Program implementing the remote build protocol
    pub executor_command: String,

    /// Upper bound for a single remote build
    pub build_timeout: Duration,

    /// Where `/metrics` is served; unset disables the endpoint
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(frontend_url: String) -> Self {
        Self {
            frontend_url,
            frontend_auth: None,
            destdir: PathBuf::from("/var/lib/kiln/results"),
            pool: PoolConfig::default(),
            vm_acquire_timeout: Duration::ZERO,
            max_workers: 8,
            do_sign: false,
            notify_url: None,
            executor_command: "kiln-build".to_string(),
            build_timeout: Duration::from_secs(3600),
            metrics_addr: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - FRONTEND_URL (optional, default: http://localhost:5000)
    /// - FRONTEND_AUTH (optional)
    /// - DESTDIR (optional, default: /var/lib/kiln/results)
    /// - POOL_FILE (optional, JSON with `groups` and `vms`)
    /// - VM_ACQUIRE_TIMEOUT (optional, seconds, default: 0)
    /// - MAX_WORKERS (optional, default: 8)
    /// - DO_SIGN (optional, default: false)
    /// - NOTIFY_URL (optional)
    /// - EXECUTOR_COMMAND (optional, default: kiln-build)
    /// - BUILD_TIMEOUT (optional, seconds, default: 3600)
    /// - METRICS_ADDR (optional, e.g. 127.0.0.1:9100)
    ///
    /// Only a missing FRONTEND_URL falls back to a default. An unreadable
    /// POOL_FILE or a malformed METRICS_ADDR is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source, see [`Config::from_env`]
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let frontend_url = var("FRONTEND_URL").unwrap_or_else(|| {
            warn!(
                "FRONTEND_URL not set, using default {}",
                DEFAULT_FRONTEND_URL
            );
            DEFAULT_FRONTEND_URL.to_string()
        });

        let mut config = Self::new(frontend_url);

        config.frontend_auth = var("FRONTEND_AUTH");

        if let Some(destdir) = var("DESTDIR") {
            config.destdir = PathBuf::from(destdir);
        }

        if let Some(pool_file) = var("POOL_FILE") {
            config.pool = PoolConfig::load(Path::new(&pool_file))?;
        }

        config.vm_acquire_timeout = var("VM_ACQUIRE_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO);

        config.max_workers = var("MAX_WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(8);

        config.do_sign = var("DO_SIGN")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        config.notify_url = var("NOTIFY_URL").filter(|s| !s.is_empty());

        if let Some(command) = var("EXECUTOR_COMMAND") {
            config.executor_command = command;
        }

        config.build_timeout = var("BUILD_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        if let Some(addr) = var("METRICS_ADDR").filter(|s| !s.is_empty()) {
            config.metrics_addr = Some(
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid METRICS_ADDR {}", addr))?,
            );
        }

        Ok(config)
    }

    /// Looks up the configured name of a builder group
    pub fn group_name(&self, id: GroupId) -> Option<&str> {
        self.pool
            .groups
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.name.as_str())
    }

    /// Picks the builder group serving `arch`
    pub fn group_for_arch(&self, arch: &str) -> Option<GroupId> {
        self.pool
            .groups
            .iter()
            .find(|g| g.archs.iter().any(|a| a == arch))
            .map(|g| g.id)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.frontend_url.is_empty() {
            anyhow::bail!("frontend_url cannot be empty");
        }

        if !self.frontend_url.starts_with("http://") && !self.frontend_url.starts_with("https://")
        {
            anyhow::bail!("frontend_url must start with http:// or https://");
        }

        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }

        if self.executor_command.is_empty() {
            anyhow::bail!("executor_command cannot be empty");
        }

        if self.build_timeout.as_secs() == 0 {
            anyhow::bail!("build_timeout must be greater than 0");
        }

        for vm in &self.pool.vms {
            if self.group_name(vm.group).is_none() {
                anyhow::bail!("vm {} references unknown group {}", vm.name, vm.group);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_URL.to_string())
    }
}
