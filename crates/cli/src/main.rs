//! sleuth CLI - full-text index node and one-shot index commands

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{Target, cmd_daemon, cmd_delete, cmd_info, cmd_search, cmd_update, cmd_version};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "sleuth")]
#[command(about = "Full-text index node with per-index actors")]
#[command(after_help = "\
QUICK START:
  sleuth daemon --foreground              # Run the node in this terminal
  sleuth update fruits 1 '{\"name\":\"apple\"}' --seq 1
  sleuth search fruits 'name:apple'

CONFIG LOCATIONS:
  User: ~/.config/sleuth/config.toml (or --config PATH)")]
struct Cli {
  /// Config file to use instead of the user config
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Arguments naming the index a one-shot command works on
#[derive(clap::Args)]
struct IndexArgs {
  /// Index path, relative to the configured index directory
  path: String,

  /// Analyzer the index is opened with
  #[arg(long, default_value = "standard")]
  analyzer: String,
}

#[derive(Subcommand)]
enum Commands {
  #[command(long_about = "Start the node.\n\n\
    Without --foreground the daemon detaches and logs to a rolling file \
    under the data directory.")]
  Daemon {
    #[arg(long)]
    foreground: bool,

    #[arg(long, hide = true)]
    background: bool,
  },

  #[command(after_help = "\
EXAMPLES:
  sleuth search fruits '*:*'
  sleuth search fruits 'name:apple OR name:cherry' --limit 5
  sleuth search fruits apple --partition p1")]
  Search {
    #[command(flatten)]
    index: IndexArgs,

    query: String,

    #[arg(short, long)]
    limit: Option<i64>,

    /// Confine the search to one partition
    #[arg(short, long)]
    partition: Option<String>,
  },

  /// Add or replace a document
  Update {
    #[command(flatten)]
    index: IndexArgs,

    id: String,

    /// Document fields as a JSON object
    fields: String,

    /// Update sequence to commit with; defaults to the committed one plus one
    #[arg(long)]
    seq: Option<i64>,
  },

  /// Delete a document by id
  Delete {
    #[command(flatten)]
    index: IndexArgs,

    id: String,

    /// Update sequence to commit with; defaults to the committed one plus one
    #[arg(long)]
    seq: Option<i64>,
  },

  /// Show document counts and committed sequences
  Info {
    #[command(flatten)]
    index: IndexArgs,
  },

  /// Show CLI and node versions
  Version,
}

impl IndexArgs {
  fn target<'a>(&'a self, config_path: Option<&'a std::path::Path>) -> Target<'a> {
    Target {
      config_path,
      path: &self.path,
      analyzer: &self.analyzer,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config_path = cli.config.as_deref();

  // The daemon sets up its own logging once its config is loaded
  if !matches!(cli.command, Commands::Daemon { .. }) {
    init_cli_logging();
  }

  match &cli.command {
    Commands::Daemon { foreground, background } => cmd_daemon(config_path, *foreground, *background).await,
    Commands::Search {
      index,
      query,
      limit,
      partition,
    } => cmd_search(index.target(config_path), query, *limit, partition.as_deref()).await,
    Commands::Update { index, id, fields, seq } => cmd_update(index.target(config_path), id, fields, *seq).await,
    Commands::Delete { index, id, seq } => cmd_delete(index.target(config_path), id, *seq).await,
    Commands::Info { index } => cmd_info(index.target(config_path)).await,
    Commands::Version => cmd_version(config_path).await,
  }
}
