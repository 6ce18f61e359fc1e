//! Node-manager HTTP client.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use nodewatch_types::{Batch, NodeStatusSnapshot, StartRequest, StatusResponse};

use crate::ClientError;

const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the node-manager API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: Client,
    endpoint: String,
}

impl ControlClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> ControlClientBuilder {
        ControlClientBuilder::default()
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the current status of every node.
    ///
    /// Accepts both a bare array and `{"node_status": [...]}`.
    pub async fn fetch_status(&self) -> Result<Vec<NodeStatusSnapshot>, ClientError> {
        let response: StatusResponse = self.get_json("/nodes/status").await?;
        Ok(response.into_snapshots())
    }

    /// Fetch all stored metrics for the initial backfill.
    ///
    /// Records are returned untouched; validating them is the caller's job.
    /// Accepts both a bare array and `{"data": [...]}`.
    pub async fn fetch_metrics(&self) -> Result<Vec<serde_json::Value>, ClientError> {
        let batch: Batch<serde_json::Value> = self.get_json("/metrics").await?;
        Ok(batch.into_items())
    }

    /// Start nodes. The count is clamped to what the manager accepts.
    pub async fn start_nodes(&self, request: &StartRequest) -> Result<(), ClientError> {
        let request = request.clone().clamped();
        let path = "/nodes/start";
        let response = self
            .client
            .post(self.url(path))
            .json(&request)
            .send()
            .await?;
        check_status(path, response)?;
        Ok(())
    }

    /// Stop all nodes.
    pub async fn stop_nodes(&self) -> Result<(), ClientError> {
        self.post_empty("/nodes/stop").await
    }

    /// Clear the manager's stored logs and metrics.
    pub async fn clear_logs(&self) -> Result<(), ClientError> {
        self.post_empty("/logs/clear").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = check_status(path, response)?;

        let body = response.bytes().await?;
        debug!(path, bytes = body.len(), "Fetched response");
        serde_json::from_slice(&body).map_err(|e| ClientError::Parse(e.to_string()))
    }

    async fn post_empty(&self, path: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check_status(path, response)?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

fn check_status(path: &str, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status {
            path: path.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Builder for ControlClient.
#[derive(Debug, Default)]
pub struct ControlClientBuilder {
    endpoint: Option<String>,
    timeout: Option<Duration>,
}

impl ControlClientBuilder {
    /// Set the API base URL (default: "http://localhost:8000").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ControlClient, ClientError> {
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(ControlClient { client, endpoint })
    }
}
