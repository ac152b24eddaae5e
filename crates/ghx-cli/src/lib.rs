//! Command-line client for `ghx-server`: submit and monitor GPU fleet
//! health-check jobs, run connectivity probes, and boot the server
//! in-process.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod output;

pub use error::CliError;
