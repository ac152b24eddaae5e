//! GHX server implementation.

use std::net::SocketAddr;

use ghx_config::GhxConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{ServerError, ServerResult};
use crate::routes::create_router;
use crate::state::AppState;

/// HTTP/SSE server binding the job orchestrator, benchmark catalog, and
/// event bus onto a REST API.
#[derive(Clone)]
pub struct GhxServer {
    state: AppState,
}

impl GhxServer {
    /// Build a server from a loaded configuration.
    #[must_use]
    pub fn new(config: GhxConfig) -> Self {
        Self { state: AppState::new(config) }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router without binding a socket, for tests or embedding.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Bind `addr` and serve until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to `addr` fails.
    pub async fn serve(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Internal(format!("bind {addr}: {e}")))?;
        info!(%addr, "ghx-server listening");
        axum::serve(listener, self.router()).await.map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to `addr` fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> ServerResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Internal(format!("bind {addr}: {e}")))?;
        info!(%addr, "ghx-server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        info!("ghx-server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_creation_does_not_panic() {
        let server = GhxServer::new(GhxConfig::new());
        let _router = server.router();
    }

    #[tokio::test]
    async fn serve_with_shutdown_returns_once_signalled() {
        let server = GhxServer::new(GhxConfig::new());
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server.serve_with_shutdown(addr, async move { let _ = rx.await; }).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = tx.send(());

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}
