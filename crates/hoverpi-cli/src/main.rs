//! hoverpi - quadcopter flight controller

mod cli;
mod record;
mod store;

use clap::Parser;
use cli::{Args, Outcome};
use hoverpi_core::ConfigError;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli::run(Args::parse()) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::CalibrationFailed) => ExitCode::from(1),
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            error!("invalid configuration: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
