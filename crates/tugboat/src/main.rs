//! Tugboat: cron scheduler for container jobs
//!
//! Main binary with subcommands:
//! - `daemon`: Run the scheduler, config watch, and web server
//! - `check-config`: Validate a configuration file and print the schedule

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;

#[derive(Parser)]
#[command(name = "tugboat")]
#[command(about = "Cron scheduler for container jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (scheduler, config watch, web server)
    Daemon {
        /// Configuration file
        #[arg(long, env = "TUGBOAT_CONFIG", default_value = "tugboat.toml")]
        config: PathBuf,
    },

    /// Validate a configuration file and print the resulting schedule
    CheckConfig {
        /// Configuration file
        #[arg(long, env = "TUGBOAT_CONFIG", default_value = "tugboat.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tugboat=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { config } => daemon::run(config).await,
        Commands::CheckConfig { config } => check_config(config).await,
    }
}

async fn check_config(path: PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| miette::miette!("cannot read {}: {e}", path.display()))?;

    let config = config::DaemonConfig::parse(&raw)?;
    let loaded = tugboat_scheduler::registry::load(&raw).map_err(|e| miette::miette!("{e}"))?;

    if loaded.definitions.is_empty() {
        return Err(miette::miette!("no usable jobs in {}", path.display()));
    }

    println!("docker binary: {}", config.docker.binary);
    println!("log directory: {}", config.logs.dir.display());
    println!("web port:      {}", config.web.port);
    println!();

    let mut problems = 0;
    for def in &loaded.definitions {
        let state = if def.disabled { "disabled" } else { "enabled" };
        let cron_ok = def.disabled
            || cron::Schedule::from_str(&def.cron.replace('?', "*")).is_ok();
        if !cron_ok {
            problems += 1;
        }
        println!(
            "{:<24} {:<8} {:<10} {} {}",
            def.name,
            def.handler.to_string(),
            state,
            def.cron,
            if cron_ok { "" } else { "  <- invalid cron" }
        );
    }

    if problems > 0 {
        return Err(miette::miette!("{problems} job(s) with invalid cron statements"));
    }
    println!("\n{} job(s) ok", loaded.definitions.len());
    Ok(())
}
