//! Prometheus build metrics
//!
//! # Metrics
//!
//! ## Counters
//! - `kiln_builds_total{outcome}` - Build attempts by outcome (`succeeded`, `failed`)
//!
//! The registry is exported in Prometheus text format by [`serve`] so the
//! whole fleet can be scraped.

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const OUTCOME_SUCCEEDED: &str = "succeeded";
const OUTCOME_FAILED: &str = "failed";

/// Build attempt counters backed by a Prometheus registry
#[derive(Clone)]
pub struct BuildMetrics {
    registry: Registry,
    builds_total: IntCounterVec,
}

/// Point-in-time copy of [`BuildMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl BuildMetrics {
    /// Creates the counters and registers them with a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Creates the counters and registers them with `registry`
    ///
    /// Fails if the registry already holds a metric with the same name.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let builds_total = IntCounterVec::new(
            Opts::new("kiln_builds_total", "Total build attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(builds_total.clone()))?;

        Ok(Self {
            registry,
            builds_total,
        })
    }

    /// Records the outcome of one build attempt
    pub fn register_build_result(&self, failed: bool) {
        let outcome = if failed {
            OUTCOME_FAILED
        } else {
            OUTCOME_SUCCEEDED
        };
        self.builds_total.with_label_values(&[outcome]).inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self
            .builds_total
            .with_label_values(&[OUTCOME_SUCCEEDED])
            .get();
        let failed = self.builds_total.with_label_values(&[OUTCOME_FAILED]).get();
        MetricsSnapshot {
            attempts: succeeded + failed,
            succeeded,
            failed,
        }
    }

    /// Encodes every registered metric in Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for BuildMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildMetrics")
            .field("builds", &self.snapshot())
            .finish()
    }
}

/// Serves `GET /metrics` on `listener` until the task is dropped
pub async fn serve(metrics: Arc<BuildMetrics>, listener: TcpListener) -> std::io::Result<()> {
    let handler = move || {
        let metrics = Arc::clone(&metrics);
        async move {
            match metrics.encode_text() {
                Ok(body) => (
                    StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    body,
                )
                    .into_response(),
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to encode metrics: {e}"),
                    )
                        .into_response()
                }
            }
        }
    };

    let app = Router::new().route("/metrics", get(handler));

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Metrics HTTP server listening");
    }
    axum::serve(listener, app).await
}
