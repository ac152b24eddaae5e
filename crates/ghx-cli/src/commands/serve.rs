//! `serve` command: boot `ghx-server` in-process.

use std::net::SocketAddr;

use ghx_config::GhxConfig;
use ghx_server::GhxServer;

use crate::cli::ServeArgs;
use crate::error::CliError;

/// Handler for the `serve` command.
pub struct ServeCommand;

impl ServeCommand {
    /// Bind `args.bind` and serve until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid or binding fails.
    pub async fn execute(&self, args: &ServeArgs) -> Result<(), CliError> {
        let addr: SocketAddr = args.bind.parse().map_err(|e| CliError::Format(format!("invalid bind address: {e}")))?;
        let server = GhxServer::new(GhxConfig::from_env());
        server.serve(addr).await.map_err(|e| CliError::Server(e.to_string()))
    }
}
