mod app;
mod cache;
mod config;
mod event;
mod site;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chapel")]
#[command(about = "An offline-tolerant client for the church website")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/chapel/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Behave as if the site were unreachable
  #[arg(long, global = true)]
  offline: bool,

  /// Keep cache and queue in memory for this run only
  #[arg(long, global = true)]
  no_persist: bool,

  #[command(subcommand)]
  command: app::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let overrides = app::Overrides {
    offline: args.offline,
    no_persist: args.no_persist,
  };

  let app = app::App::new(config, overrides).await?;
  app.run(args.command).await?;

  Ok(())
}

/// Log to a daily file so stdout stays free for command output.
///
/// The filter comes from CHAPEL_LOG (default: info).
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("chapel")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "chapel.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("CHAPEL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
