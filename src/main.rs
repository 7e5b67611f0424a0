mod api;
mod commands;
mod config;
mod db;
mod error;
mod logging;
mod sync;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "storysync")]
#[command(about = "An offline-first client for the story service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storysync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long, global = true)]
  offline: bool,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let _guard = logging::init(&config.data_dir()?.join("logs"), args.verbose)?;

  commands::run(config, args.offline, args.command).await
}
