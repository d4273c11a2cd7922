//! Lifecycle notification side channel
//!
//! Best effort only: a failed publish is logged by the caller and never
//! changes the outcome of a build.

use async_trait::async_trait;
use kiln_core::domain::event::LifecycleEvent;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to publish message: {0}")]
    Publish(#[from] reqwest::Error),

    #[error("Message bus refused the message (status {0})")]
    Refused(u16),
}

/// Service trait for publishing lifecycle events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), NotifyError>;
}

/// Notifier used when no message bus is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, _event: &LifecycleEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Publishes events as JSON to an HTTP endpoint of the message bus
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    url: String,
    client: Client,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), NotifyError> {
        debug!("Publishing {} to {}: {}", event.topic.as_str(), self.url, event);

        let response = self
            .client
            .post(&self.url)
            .query(&[("topic", event.topic.as_str())])
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Refused(status.as_u16()));
        }
        Ok(())
    }
}
