mod aggregate;
mod config;
mod constants;
mod downstream;
mod egress;
mod engine;
mod logging;

use crate::config::Config;
use crate::engine::Engine;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error};

/// Aggregating relay for StatsD metric packets.
#[derive(Debug, Parser)]
struct Args {
    /// Path to the configuration file
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let loaded = Config::load(&args.config);
    logging::init(
        loaded
            .as_ref()
            .map(|config| config.log_level)
            .unwrap_or(Level::ERROR),
    );
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("cannot load configuration from {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    let engine = match Engine::new(config).await {
        Ok(engine) => engine,
        Err(err) => {
            error!("startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match engine.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("relay terminated: {err}");
            ExitCode::FAILURE
        }
    }
}
