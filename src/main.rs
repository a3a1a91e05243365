//! wmbench CLI - Audio Watermark Service
//!
//! Command-line interface for embedding, detecting and stress-testing
//! audio watermarks against an on-disk catalog.

use clap::Parser;
use env_logger::Env;
use log::info;

use wmbench::cli::{commands, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    info!("wmbench v{}", env!("CARGO_PKG_VERSION"));

    commands::run(cli)
}
