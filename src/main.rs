use std::process::ExitCode;

use clap::Parser;
use nestegg::api::{Cli, Command, list_strategies, run_command, run_http_server};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => {
            if let Err(e) = run_command(args) {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        }
        Command::Strategies => list_strategies(),
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                error!("server error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
