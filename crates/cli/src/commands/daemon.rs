//! Daemon command

use std::path::Path;

use anyhow::{Context, Result};
use sleuth::{Daemon, RuntimeConfig};
use tracing::{error, info};

use crate::logging::init_daemon_logging;

/// Start the node.
///
/// Without `--foreground` this re-launches the binary detached and returns
/// once the child is spawned. `background` marks that detached child.
pub async fn cmd_daemon(config_path: Option<&Path>, foreground: bool, background: bool) -> Result<()> {
  if !foreground && !background {
    let pid = Daemon::spawn_detached(config_path).context("Failed to spawn daemon")?;
    println!("Daemon started (pid {pid})");
    return Ok(());
  }

  let mut runtime_config = RuntimeConfig::load(config_path).context("Failed to load config")?;
  runtime_config.foreground = foreground;
  let _guard = init_daemon_logging(&runtime_config.config.daemon, foreground);

  info!(socket = %runtime_config.socket_path.display(), "Starting sleuth daemon");
  let result = Daemon::new(runtime_config).run().await;

  // Index threads still inside the engine must not hold the process open
  match result {
    Ok(()) => {
      info!("Daemon stopped");
      std::process::exit(0)
    }
    Err(e) => {
      error!("Daemon failed: {e}");
      Err(e).context("Failed to run daemon")
    }
  }
}
