//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// GHX CLI — submit and monitor GPU fleet health-check jobs.
#[derive(Parser, Debug, Clone)]
#[command(name = "ghx")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Base URL of a running `ghx-server`.
    #[arg(short, long, env = "GHX_SERVER", default_value = "http://localhost:8080")]
    pub server: String,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Compact key=value line(s).
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Job management commands.
    Job {
        /// Job subcommand to execute.
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Benchmark catalog commands.
    Catalog {
        /// Catalog subcommand to execute.
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// SSH test-connection probe.
    TestConnection(TestConnectionArgs),
    /// Boot `ghx-server` in-process.
    Serve(ServeArgs),
}

/// Job subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum JobCommands {
    /// Submit a job from a JSON submission file.
    Submit(JobSubmitArgs),
    /// List every known job.
    List,
    /// Show one job by id.
    Get(JobIdArgs),
    /// Stop a running job.
    Stop(JobIdArgs),
}

/// Arguments for `job submit`.
#[derive(clap::Args, Debug, Clone)]
pub struct JobSubmitArgs {
    /// Path to a JSON file matching the job submission schema.
    pub submission_file: PathBuf,
}

/// Arguments for `job get`/`job stop`.
#[derive(clap::Args, Debug, Clone)]
pub struct JobIdArgs {
    /// The job's id.
    pub job_id: String,
}

/// Catalog subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CatalogCommands {
    /// Reload the benchmark catalog from disk.
    Reload,
}

/// Arguments for the `test-connection` command.
#[derive(clap::Args, Debug, Clone)]
pub struct TestConnectionArgs {
    /// Path to a JSON file describing the node connection.
    pub connection_file: PathBuf,
}

/// Arguments for the `serve` command.
#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind, e.g. `0.0.0.0:8080`.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: String,
}
