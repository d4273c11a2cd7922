//! Kiln Worker binary
//!
//! Reads a batch of queued build requests, leases a builder VM for each and
//! supervises the builds until all of them are reported to the frontend.

use anyhow::{Context, Result};
use clap::Parser;
use kiln_client::FrontendClient;
use kiln_core::domain::job::{BuildJob, BuildStatus};
use kiln_core::dto::build::BuildRequest;
use kiln_worker::config::Config;
use kiln_worker::executor::CommandExecutor;
use kiln_worker::pool::InMemoryVmPool;
use kiln_worker::scheduler::{Dispatcher, WorkerContext, WorkerError};
use kiln_worker::service::{
    BuildMetrics, HttpNotifier, NoopNotifier, Notifier, ResultArchiver, TitleBoard,
    serve_metrics,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "kiln-worker", about = "Runs queued package builds on the builder pool")]
struct Args {
    /// JSON file holding an array of build requests
    #[arg(long, env = "KILN_JOBS")]
    jobs: PathBuf,
}

type Running = VecDeque<JoinHandle<Result<BuildJob, WorkerError>>>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Kiln worker");

    let config = load_config()?;
    info!(
        "Loaded configuration: frontend_url={}, destdir={}, vms={}",
        config.frontend_url,
        config.destdir.display(),
        config.pool.vms.len()
    );

    let requests = load_requests(&args.jobs)?;
    info!("Loaded {} build request(s)", requests.len());

    let mut client = FrontendClient::new(config.frontend_url.clone());
    if let Some(password) = &config.frontend_auth {
        client = client.with_auth(password.clone());
    }

    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };

    let pool = Arc::new(InMemoryVmPool::new(&config.pool, config.vm_acquire_timeout));
    let metrics = Arc::new(BuildMetrics::new().context("Failed to register metrics")?);
    let titles = Arc::new(TitleBoard::new());

    if let Some(addr) = config.metrics_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics server on {}", addr))?;
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics, listener).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let ctx = WorkerContext {
        executor: Arc::new(CommandExecutor::new(
            &config.executor_command,
            config.build_timeout,
        )),
        config: Arc::new(config),
        reporter: Arc::new(client),
        notifier,
        titles: titles.clone(),
        metrics: Arc::clone(&metrics),
        archiver: ResultArchiver::new(),
    };

    let dispatcher = Dispatcher::new(ctx, pool);
    let mut running = Running::new();

    for req in requests {
        dispatch_with_retry(&dispatcher, &titles, req, &mut running).await;
    }

    while let Some(handle) = running.pop_front() {
        report(handle).await;
    }

    let totals = metrics.snapshot();
    info!(
        "All builds finished: attempts={}, succeeded={}, failed={}",
        totals.attempts, totals.succeeded, totals.failed
    );

    Ok(())
}

/// Loads configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

fn load_requests(path: &Path) -> Result<Vec<BuildRequest>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read jobs file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse jobs file {}", path.display()))
}

/// Dispatches `req`, waiting for running builds to free a VM when the pool
/// is exhausted
async fn dispatch_with_retry(
    dispatcher: &Dispatcher,
    titles: &TitleBoard,
    req: BuildRequest,
    running: &mut Running,
) {
    let build_id = req.build_id;

    loop {
        match dispatcher.dispatch(req.clone()).await {
            Ok(handle) => {
                running.push_back(handle);
                return;
            }
            Err(e) if e.is_retryable() => match running.pop_front() {
                Some(handle) => {
                    info!("{}, waiting for a running build before retrying", e);
                    for (worker_id, title) in titles.snapshot() {
                        info!(worker_id, "busy: {}", title);
                    }
                    report(handle).await;
                }
                None => {
                    error!("Build {} cannot be dispatched: {}", build_id, e);
                    return;
                }
            },
            Err(e) => {
                error!("Build {} cannot be dispatched: {}", build_id, e);
                return;
            }
        }
    }
}

async fn report(handle: JoinHandle<Result<BuildJob, WorkerError>>) {
    match handle.await {
        Ok(Ok(job)) if job.status() == BuildStatus::Succeeded => {
            info!("Build {} ({}) succeeded", job.build_id, job.chroot);
        }
        Ok(Ok(job)) => warn!("Build {} ({}) failed", job.build_id, job.chroot),
        Ok(Err(e)) => error!("Worker error: {}", e),
        Err(e) => error!("Worker task panicked: {}", e),
    }
}
