//! SSH test-connection probe command implementation.

use std::io::Write;

use crate::cli::TestConnectionArgs;
use crate::client::GhxClient;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the `test-connection` command.
pub struct TestConnectionCommand {
    client: GhxClient,
}

impl TestConnectionCommand {
    /// Build a handler targeting `server_url`.
    #[must_use]
    pub fn new(server_url: &str) -> Self {
        Self { client: GhxClient::new(server_url) }
    }

    /// Probe the connection described by `args.connection_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read/parsed or the request fails.
    pub async fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat, args: &TestConnectionArgs) -> Result<(), CliError> {
        let content = std::fs::read_to_string(&args.connection_file)?;
        let connection: serde_json::Value = serde_json::from_str(&content).map_err(|e| CliError::Format(e.to_string()))?;
        let probe = self.client.test_connection(&connection).await?;
        let value = serde_json::to_value(&probe).map_err(|e| CliError::Format(e.to_string()))?;
        format.write(out, &value)
    }
}
