//! HTTP/SSE surface binding the GPU fleet health-check core onto axum:
//! job submission/read/list/stop, SSH test-connection, command-presence
//! checks, multi-node NCCL submit/poll, and the SSE event stream.

mod error;
mod handlers;
mod multihost;
mod probes;
mod routes;
mod server;
mod state;

pub use error::{ServerError, ServerResult};
pub use multihost::{MultiHostRun, MultiHostStatus, MultiHostStore, MultiHostSubmission};
pub use probes::{test_connection as probe_connection, CommandPresenceProbe, ConnectionProbe, ProbeOutcome};
pub use routes::create_router;
pub use server::GhxServer;
pub use state::AppState;
