//! `jsonp` - issue one correlated callback request and print the result.
//!
//! ```text
//! main() -> Args::parse() -> JsonpConfig::load() -> Loader::http() -> load()
//!                                                                       |
//!                                                                       v
//!                                       stdout: payload | stderr: error JSON
//! ```
//!
//! Logs go to stderr so stdout carries nothing but the payload.

mod args;

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use jsonp_config::JsonpConfig;
use jsonp_loader::Loader;

use crate::args::Args;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = JsonpConfig::load()
        .context("failed to load configuration")?
        .map(|config| config.loader())
        .unwrap_or_default();
    let loader = Loader::http(&config).context("failed to build loader")?;
    let descriptor = args.descriptor()?;

    match loader.load(descriptor).await {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            tracing::debug!(code = ?error.code(), "Load failed");
            eprintln!("{}", serde_json::to_string_pretty(&error.to_json())?);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
