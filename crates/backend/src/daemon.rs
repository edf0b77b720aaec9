//! Daemon lifecycle management.
//!
//! The daemon owns the node and everything registered on it. It starts the
//! index manager, serves the socket gateway until cancelled, then shuts the
//! node down and waits for every index to release its writer.
//!
//! # Architecture
//!
//! ```text
//! Daemon
//!   ├── Node (mailboxes, names, links)
//!   │     ├── IndexManager ("main")
//!   │     └── IndexActor (one per open index, linked to its opener)
//!   └── Server (socket gateway, one mailbox per connection)
//! ```
//!
//! # Lifecycle
//!
//! 1. Create the node and shared `ServerState`
//! 2. Register and start the `IndexManager`
//! 3. Run the server until cancelled (ctrl-c, SIGTERM or the caller's token)
//! 4. Send `shutdown` to every mailbox and wait for them to close

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use tokio::{runtime::Handle, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  actor::{IndexManager, ServerState},
  config::{Config, ConfigError},
  ipc::{Client, IpcError},
  node::{ExitReason, Node, NodeError},
  server::Server,
};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error("Failed to start index manager: {0}")]
  Node(#[from] NodeError),
  #[error("Server error: {0}")]
  Ipc(#[from] IpcError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Daemon runtime configuration: the loaded config file plus process-level overrides.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Path to the Unix socket for the gateway
  pub socket_path: PathBuf,
  /// Run in foreground mode (log to the console instead of files)
  pub foreground: bool,
  pub config: Config,
}

impl RuntimeConfig {
  /// Load from `config_path`, or from the user config file when `None`.
  pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
    let config = match config_path {
      Some(path) => Config::load_from(path)?,
      None => Config::load()?,
    };
    Ok(Self::from_config(config))
  }

  pub fn from_config(config: Config) -> Self {
    Self {
      socket_path: config.socket_path(),
      foreground: false,
      config,
    }
  }
}

pub struct Daemon {
  runtime_config: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Connect to the daemon at `socket_path`, starting one if necessary.
  ///
  /// A freshly spawned daemon is polled for up to 5 seconds before giving up.
  pub async fn connect_or_start(socket_path: &Path, config_path: Option<&Path>) -> Result<Client, IpcError> {
    if let Ok(client) = Client::connect(socket_path).await {
      debug!("Daemon is already running");
      return Ok(client);
    }

    info!("Daemon is not running, starting in background...");
    let pid = Self::spawn_detached(config_path)?;
    debug!("Spawned daemon with PID {}", pid);

    let delay = Duration::from_millis(500);
    let max_attempts = 10;
    for attempt in 1..=max_attempts {
      tokio::time::sleep(delay).await;
      if let Ok(client) = Client::connect(socket_path).await {
        info!("Successfully connected to daemon");
        return Ok(client);
      }
      debug!("Waiting for daemon to start... (attempt {}/{})", attempt, max_attempts);
    }

    Err(IpcError::Connection("Failed to connect to daemon after startup".into()))
  }

  /// Re-execute the current binary as `daemon --background`, detached from
  /// this terminal. Returns the child PID.
  pub fn spawn_detached(config_path: Option<&Path>) -> std::io::Result<u32> {
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe()?;
    let mut command = Command::new(&exe);
    command.arg("daemon").arg("--background");
    if let Some(path) = config_path {
      command.arg("--config").arg(path);
    }

    let child = command
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()?;

    info!("Spawned daemon process with PID {}", child.id());
    Ok(child.id())
  }

  /// Run until ctrl-c or SIGTERM.
  pub async fn run(self) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      wait_for_signal().await;
      cancel_for_signal.cancel();
    });

    self.run_until(cancel).await
  }

  /// Run until `cancel` fires, then shut the node down.
  pub async fn run_until(self, cancel: CancellationToken) -> Result<(), DaemonError> {
    let RuntimeConfig {
      socket_path,
      foreground,
      config,
    } = self.runtime_config;

    info!("Starting sleuth daemon (foreground: {})", foreground);
    info!("Socket: {:?}", socket_path);
    info!("Index root: {:?}", config.index.dir);

    let shutdown_timeout = config.shutdown_timeout();
    let node = Node::new(config.node.name.clone(), Handle::current());
    let state = ServerState::new(config, Arc::clone(&node));
    IndexManager::spawn(state)?;

    let server = Server::new(socket_path, Arc::clone(&node));
    let result = server.run(cancel.child_token()).await;
    if let Err(e) = &result {
      warn!("Server error: {}", e);
    }

    info!("Shutting down...");
    cancel.cancel();
    node.shutdown(ExitReason::Shutdown);
    if !node.wait_idle(shutdown_timeout).await {
      warn!(
        remaining = node.mailbox_count(),
        "Timed out waiting for mailboxes to close"
      );
    }

    info!("Daemon shutdown complete");
    result.map_err(Into::into)
  }
}

async fn wait_for_signal() {
  #[cfg(unix)]
  {
    use signal::unix::{SignalKind, signal as unix_signal};

    let mut terminate = match unix_signal(SignalKind::terminate()) {
      Ok(terminate) => terminate,
      Err(e) => {
        warn!("Failed to listen for SIGTERM: {}", e);
        if let Err(e) = signal::ctrl_c().await {
          warn!("Failed to listen for ctrl-c: {}", e);
        }
        return;
      }
    };

    tokio::select! {
      result = signal::ctrl_c() => {
        if let Err(e) = result {
          warn!("Failed to listen for ctrl-c: {}", e);
          return;
        }
        info!("Received ctrl-c, shutting down...");
      }
      _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
    }
  }

  #[cfg(not(unix))]
  {
    if let Err(e) = signal::ctrl_c().await {
      warn!("Failed to listen for ctrl-c: {}", e);
      return;
    }
    info!("Received ctrl-c, shutting down...");
  }
}
