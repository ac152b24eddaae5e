//! HTTP client for talking to a running `ghx-server`.

use std::time::Duration;

use ghx_server::{ConnectionProbe, MultiHostRun};
use serde_json::Value;

use crate::error::CliError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin REST client over the server's `/api` surface.
#[derive(Debug, Clone)]
pub struct GhxClient {
    base_url: String,
    http: reqwest::Client,
}

impl GhxClient {
    /// Build a client targeting `base_url` (e.g. `http://localhost:8080`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build().unwrap_or_default();
        Self { base_url: base_url.into(), http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url.trim_end_matches('/'))
    }

    /// Submit a job from an already-parsed submission body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn submit_job(&self, submission: &Value) -> Result<Value, CliError> {
        self.post_json("/jobs", submission).await
    }

    /// Fetch every known job.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_jobs(&self) -> Result<Value, CliError> {
        self.get_json("/jobs").await
    }

    /// Fetch one job by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the job does not exist.
    pub async fn get_job(&self, job_id: &str) -> Result<Value, CliError> {
        self.get_json(&format!("/jobs/{job_id}")).await
    }

    /// Stop a running job.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn stop_job(&self, job_id: &str) -> Result<Value, CliError> {
        self.post_json(&format!("/jobs/{job_id}/stop"), &Value::Null).await
    }

    /// Trigger a benchmark catalog reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn reload_catalog(&self) -> Result<Value, CliError> {
        self.post_json("/catalog/reload", &Value::Null).await
    }

    /// Run the SSH test-connection probe against `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn test_connection(&self, connection: &Value) -> Result<ConnectionProbe, CliError> {
        let response = self.http.post(self.url("/probes/test-connection")).json(connection).send().await?;
        Self::handle_response(response).await
    }

    /// Poll a multi-host NCCL run.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the run does not exist.
    pub async fn get_multi_host(&self, run_id: &str) -> Result<MultiHostRun, CliError> {
        let response = self.http.get(self.url(&format!("/nccl/multi-host/{run_id}"))).send().await?;
        Self::handle_response(response).await
    }

    async fn get_json(&self, path: &str) -> Result<Value, CliError> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::handle_response(response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, CliError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CliError::Server(format!("{status}: {body}")));
        }
        response.json().await.map_err(CliError::from)
    }
}
