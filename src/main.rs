use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use looplag::{server, HarnessArgs, HarnessBuilder};

/// Serve the monopolizing or cooperative workload set and watch the loop lag.
#[derive(Debug, Parser)]
#[command(name = "looplag", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(flatten)]
    harness: HarnessArgs,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut builder = HarnessBuilder::new();
    if let Some(ref path) = cli.config {
        builder = builder.file(path);
    }
    let runtime = match builder
        .env_prefix("LOOPLAG")
        .with_cli_args(&cli.harness)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(%e, "failed to build harness runtime");
            return ExitCode::FAILURE;
        }
    };
    info!(%runtime, "runtime ready");

    match runtime.block_on(server::run(&runtime)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "server failed");
            ExitCode::FAILURE
        }
    }
}
