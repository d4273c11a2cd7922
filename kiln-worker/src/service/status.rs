//! Status reporting
//!
//! Pushes build snapshots to the frontend. Every failure is surfaced as a
//! [`CommunicationError`]; nothing is retried or swallowed here.

use async_trait::async_trait;
use kiln_client::{ClientError, FrontendClient};
use kiln_core::dto::build::BuildSnapshot;
use thiserror::Error;

/// The frontend could not be told about a status change
#[derive(Debug, Error)]
#[error("Could not communicate to the frontend: {0}")]
pub struct CommunicationError(#[from] pub ClientError);

/// Service trait for reporting build state to the system of record
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Sends one batch of snapshots in a single call
    async fn update(&self, builds: Vec<BuildSnapshot>) -> Result<(), CommunicationError>;
}

#[async_trait]
impl StatusReporter for FrontendClient {
    async fn update(&self, builds: Vec<BuildSnapshot>) -> Result<(), CommunicationError> {
        FrontendClient::update(self, builds).await?;
        Ok(())
    }
}
