//! Job submission/read/list/stop command implementations.

use std::io::Write;

use crate::cli::{JobIdArgs, JobSubmitArgs};
use crate::client::GhxClient;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the `job` subcommand family.
pub struct JobCommand {
    client: GhxClient,
}

impl JobCommand {
    /// Build a handler targeting `server_url`.
    #[must_use]
    pub fn new(server_url: &str) -> Self {
        Self { client: GhxClient::new(server_url) }
    }

    /// Submit a job read from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read/parsed or the request fails.
    pub async fn submit<W: Write>(&self, out: &mut W, format: &OutputFormat, args: &JobSubmitArgs) -> Result<(), CliError> {
        let content = std::fs::read_to_string(&args.submission_file)?;
        let submission: serde_json::Value = serde_json::from_str(&content).map_err(|e| CliError::Format(e.to_string()))?;
        let response = self.client.submit_job(&submission).await?;
        format.write(out, &response)
    }

    /// List every known job.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let response = self.client.list_jobs().await?;
        format.write(out, &response)
    }

    /// Show one job.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the job does not exist.
    pub async fn get<W: Write>(&self, out: &mut W, format: &OutputFormat, args: &JobIdArgs) -> Result<(), CliError> {
        let response = self.client.get_job(&args.job_id).await?;
        format.write(out, &response)
    }

    /// Stop a running job.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn stop<W: Write>(&self, out: &mut W, format: &OutputFormat, args: &JobIdArgs) -> Result<(), CliError> {
        let response = self.client.stop_job(&args.job_id).await?;
        format.write(out, &response)
    }
}
