//! memdiag CLI
//!
//! Node-level memory diagnostics: watch memory for sustained growth,
//! produce leak reports for processes, and reconstruct OOM kills.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{leak, oom, watch};
use memdiag_lib::{shutdown, DiagError, ShutdownTrigger};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::output::LogFormat;

/// Memory leak and OOM diagnostics for containerized nodes
#[derive(Parser)]
#[command(name = "memdiag")]
#[command(author, version, about = "Memory leak and OOM diagnostics for containerized nodes", long_about = None)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/memdiag/config.toml)
    #[arg(long, global = true, env = "MEMDIAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Diagnostic log format on stderr
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample memory periodically and alert on sustained growth
    Watch(watch::WatchArgs),

    /// Score a process (or the top candidates) for memory leaks
    Leak(leak::LeakArgs),

    /// Show OOM kills found in the kernel log and journal
    Oom(oom::OomArgs),
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Fire the shutdown trigger on SIGINT or SIGTERM
fn spawn_signal_handler(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        trigger.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            debug!(error = %e, "SIGTERM handler unavailable");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = config::Settings::load(cli.config.as_deref())?;
    debug!(node_name = %settings.node_name, proc_root = %settings.proc_root.display(), "Configuration loaded");

    let (trigger, shutdown) = shutdown::channel();
    spawn_signal_handler(trigger);

    match cli.command {
        Commands::Watch(args) => watch::run(&settings, args, shutdown).await,
        Commands::Leak(args) => {
            leak::run(&settings, args, shutdown).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Oom(args) => {
            oom::run(&settings, args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 2 for configuration rejected before sampling, 1 for anything else
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<DiagError>() {
        Some(DiagError::InvalidConfiguration(_)) => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            output::print_error(&format!("{:#}", err));
            ExitCode::from(exit_status(&err))
        }
    }
}
