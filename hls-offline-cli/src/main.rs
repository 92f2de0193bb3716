mod cli;
mod commands;
mod config;
mod logging;

use std::process;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing::error;

use crate::{cli::Args, commands::CommandExecutor, config::AppConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let _log_guard = logging::init_logging(args.log_dir.as_deref())?;
    let config = AppConfig::resolve(&args)?;

    CommandExecutor::new(config).execute(args.command).await
}
