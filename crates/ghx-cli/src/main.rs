//! `ghx` CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ghx_cli::cli::{CatalogCommands, Cli, Commands, JobCommands};
use ghx_cli::commands::{CatalogCommand, JobCommand, ServeCommand, TestConnectionCommand};
use ghx_cli::output::OutputFormat;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ghx_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Job { command } => {
            let handler = JobCommand::new(&cli.server);
            match command {
                JobCommands::Submit(args) => handler.submit(&mut stdout, &format, &args).await?,
                JobCommands::List => handler.list(&mut stdout, &format).await?,
                JobCommands::Get(args) => handler.get(&mut stdout, &format, &args).await?,
                JobCommands::Stop(args) => handler.stop(&mut stdout, &format, &args).await?,
            }
        }
        Commands::Catalog { command } => {
            let handler = CatalogCommand::new(&cli.server);
            match command {
                CatalogCommands::Reload => handler.reload(&mut stdout, &format).await?,
            }
        }
        Commands::TestConnection(args) => {
            let handler = TestConnectionCommand::new(&cli.server);
            handler.execute(&mut stdout, &format, &args).await?;
        }
        Commands::Serve(args) => {
            ServeCommand.execute(&args).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_job_submit_path() {
        let cli = Cli::parse_from(["ghx", "job", "submit", "job.json"]);
        match cli.command {
            Commands::Job { command: JobCommands::Submit(args) } => {
                assert_eq!(args.submission_file.to_str().unwrap(), "job.json");
            }
            _ => panic!("expected job submit"),
        }
    }

    #[tokio::test]
    async fn run_job_list_against_unreachable_server_fails() {
        let cli = Cli::parse_from(["ghx", "-s", "http://127.0.0.1:1", "job", "list"]);
        let result = run(cli).await;
        assert!(result.is_err());
    }
}
