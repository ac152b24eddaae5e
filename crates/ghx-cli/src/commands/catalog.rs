//! Benchmark catalog command implementation.

use std::io::Write;

use crate::client::GhxClient;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the `catalog` subcommand family.
pub struct CatalogCommand {
    client: GhxClient,
}

impl CatalogCommand {
    /// Build a handler targeting `server_url`.
    #[must_use]
    pub fn new(server_url: &str) -> Self {
        Self { client: GhxClient::new(server_url) }
    }

    /// Trigger a catalog reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn reload<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let response = self.client.reload_catalog().await?;
        format.write(out, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;

    #[tokio::test]
    async fn reload_against_unreachable_server_is_an_error() {
        let command = CatalogCommand::new("http://127.0.0.1:1");
        let format = OutputFormat::new(Format::Json);
        let mut buf = Vec::new();
        assert!(command.reload(&mut buf, &format).await.is_err());
    }
}
