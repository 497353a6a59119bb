//! Datum CLI: run one assembly stage against its configured trees.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use datum::{CliArgs, init_tracing};
use datum_core::cancel_on_signal;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let settings = match args.load_settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = match settings.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(level);
    info!(settings = settings.len(), stage = ?args.stage, "datum starting");

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    match args.stage.run(&settings, shutdown).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Stage failed: {e}");
            ExitCode::FAILURE
        }
    }
}
