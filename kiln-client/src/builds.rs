//! Build status endpoints

use crate::FrontendClient;
use crate::error::Result;
use kiln_core::dto::build::{BuildSnapshot, UpdateRequest};
use tracing::debug;

impl FrontendClient {
    // =============================================================================
    // Build Status
    // =============================================================================

    /// Push a batch of build snapshots to the frontend
    ///
    /// Performs exactly one request. Transport and protocol failures are
    /// returned to the caller, no retry is attempted here.
    ///
    /// # Arguments
    /// * `builds` - Snapshots of the builds whose status changed
    pub async fn update(&self, builds: Vec<BuildSnapshot>) -> Result<()> {
        let url = format!("{}/backend/update/", self.base_url);
        let payload = UpdateRequest { builds };

        debug!("Sending {} build snapshot(s) to {}", payload.builds.len(), url);

        let mut request = self.client.post(&url).json(&payload);
        if let Some(password) = &self.auth {
            request = request.basic_auth("user", Some(password));
        }
        let response = request.send().await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClientError, FrontendClient};
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use kiln_core::domain::job::BuildStatus;
    use kiln_core::dto::build::BuildSnapshot;
    use std::sync::{Arc, Mutex};

    fn snapshot(status: BuildStatus) -> BuildSnapshot {
        BuildSnapshot {
            id: 11,
            status,
            chroot: "fedora-39-x86_64".to_string(),
            started_on: None,
            ended_on: None,
            project_owner: "alice".to_string(),
            project_name: "tools".to_string(),
            submitter: None,
            package_name: "hello".to_string(),
            package_version: None,
            built_packages: vec![],
            results: "/tmp/results".to_string(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_update_posts_builds_payload() {
        let received: Arc<Mutex<Vec<(serde_json::Value, bool)>>> = Arc::default();
        let sink = Arc::clone(&received);

        let app = Router::new().route(
            "/backend/update/",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    let authorized = headers.contains_key("authorization");
                    sink.lock().unwrap().push((body, authorized));
                    StatusCode::OK
                }
            }),
        );
        let base_url = serve(app).await;

        let client = FrontendClient::new(base_url).with_auth("secret");
        client
            .update(vec![snapshot(BuildStatus::Running)])
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (body, authorized) = &received[0];
        assert!(authorized);
        assert_eq!(body["builds"][0]["id"], 11);
        assert_eq!(body["builds"][0]["status"], "running");
    }

    #[tokio::test]
    async fn test_update_surfaces_server_errors() {
        let app = Router::new().route(
            "/backend/update/",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database is down") }),
        );
        let base_url = serve(app).await;

        let client = FrontendClient::new(base_url);
        let err = client
            .update(vec![snapshot(BuildStatus::Failed)])
            .await
            .unwrap_err();

        assert!(err.is_server_error());
        assert!(err.to_string().contains("database is down"));
    }

    #[tokio::test]
    async fn test_update_rejected_in_body() {
        let app = Router::new().route(
            "/backend/update/",
            post(|| async { Json(serde_json::json!({"error": "unknown build 11"})) }),
        );
        let base_url = serve(app).await;

        let client = FrontendClient::new(base_url);
        let err = client
            .update(vec![snapshot(BuildStatus::Running)])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Rejected(ref m) if m == "unknown build 11"));
    }

    #[tokio::test]
    async fn test_update_unauthorized() {
        let app = Router::new().route(
            "/backend/update/",
            post(|| async { (StatusCode::FORBIDDEN, "bad password") }),
        );
        let base_url = serve(app).await;

        let client = FrontendClient::new(base_url).with_auth("wrong");
        let err = client
            .update(vec![snapshot(BuildStatus::Running)])
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[tokio::test]
    async fn test_update_surfaces_transport_errors() {
        // Nothing listens on port 1
        let client = FrontendClient::new("http://127.0.0.1:1");
        let err = client
            .update(vec![snapshot(BuildStatus::Running)])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestFailed(_)));
    }
}
