//! Kiln frontend client
//!
//! A small, type-safe HTTP client for the frontend, the system of record for
//! build status. The backend only ever pushes state to it.
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::FrontendClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kiln_client::ClientError> {
//!     let client = FrontendClient::new("http://localhost:5000").with_auth("secret");
//!     client.update(vec![]).await?;
//!     Ok(())
//! }
//! ```

mod builds;
pub mod error;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;

/// HTTP client for the frontend API
#[derive(Debug, Clone)]
pub struct FrontendClient {
    /// Base URL of the frontend (e.g., "http://localhost:5000")
    base_url: String,
    /// Password sent as HTTP basic auth on backend endpoints
    auth: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl FrontendClient {
    /// Create a new frontend client
    ///
    /// # Example
    /// ```
    /// use kiln_client::FrontendClient;
    ///
    /// let client = FrontendClient::new("http://localhost:5000");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new frontend client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: None,
            client,
        }
    }

    /// Sets the password used to authenticate against backend endpoints
    pub fn with_auth(mut self, password: impl Into<String>) -> Self {
        self.auth = Some(password.into());
        self
    }

    /// Get the base URL of the frontend
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response that carries no useful content
    ///
    /// Non-2xx answers become [`ClientError::ApiError`]. A 2xx JSON body
    /// with an `error` field is treated as a rejection.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if !status.is_success() {
            return Err(ClientError::api_error(status.as_u16(), body));
        }

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
                return Err(ClientError::Rejected(message.to_string()));
            }
        }

        Ok(())
    }
}
