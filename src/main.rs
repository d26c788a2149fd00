mod args;

use args::{CoolRoutesArgs, Subaction};
use clap::Parser;
use cool_routes::config::{peek_log_level, SyncConfig};
use cool_routes::error::StageExt;
use cool_routes::{drive, pipelines, Product, Result, Stage};
use std::io::IsTerminal;
use std::path::Path;
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CoolRoutesArgs::parse();
    init_logging(peek_log_level(config_path(&args.subcmd)).as_deref());

    if let Err(e) = run(args.subcmd) {
        error!("{e}");
        process::exit(1);
    }
}

fn config_path(subcmd: &Subaction) -> &Path {
    match subcmd {
        Subaction::Ndvi(cmd) | Subaction::Lst(cmd) | Subaction::Buildings(cmd) => &cmd.config,
        Subaction::Plan(cmd) => &cmd.pipeline.config,
        Subaction::SyncDrive(cmd) => &cmd.config,
    }
}

fn run(subcmd: Subaction) -> Result<()> {
    match subcmd {
        Subaction::Ndvi(cmd) => println!("{}", pipelines::run(Product::Ndvi, &cmd.options())?),
        Subaction::Lst(cmd) => println!("{}", pipelines::run(Product::Lst, &cmd.options())?),
        Subaction::Buildings(cmd) => {
            println!("{}", pipelines::run(Product::Buildings, &cmd.options())?)
        }
        Subaction::Plan(cmd) => {
            let collection =
                pipelines::plan(cmd.product, &cmd.pipeline.options()).stage(Stage::Config)?;
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
        Subaction::SyncDrive(cmd) => {
            let config = SyncConfig::load(&cmd.config).stage(Stage::Config)?;
            println!("{}", drive::run_sync(&config)?);
        }
    }
    Ok(())
}

/// RUST_LOG wins over the config's level; logs go to stderr
fn init_logging(config_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(config_level.unwrap_or("INFO"))));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

/// logging level names (`INFO`, `WARNING`, `CRITICAL`) as tracing directives
fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}
