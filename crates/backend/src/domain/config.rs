//! Configuration for the sleuth node.
//!
//! Config priority: `--config` path > user (`~/.config/sleuth/config.toml`) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Cannot read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Node Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// Node name reported to socket clients
  pub name: String,

  /// Unix socket the gateway listens on (default: `$XDG_RUNTIME_DIR/sleuth.sock`)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub socket_path: Option<PathBuf>,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      name: "sleuth".to_string(),
      socket_path: None,
    }
  }
}

// ============================================================================
// Index Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Root directory every index path is resolved against
  pub dir: PathBuf,

  /// Storage implementation id: "mmap" or "ram"
  pub directory: String,

  /// Lock factory id: "native", "single_instance" or "none"
  pub lock_factory: String,

  /// Seconds between commit checks (0 disables the timer)
  /// Default: 30
  pub commit_interval_secs: u64,

  /// Close indexes that saw no calls for a whole idle check interval
  pub close_if_idle: bool,

  /// Default: 300 (5 minutes)
  pub idle_check_interval_secs: u64,

  /// Indexing memory budget per writer
  pub writer_memory_mb: usize,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      dir: PathBuf::from("target/indexes"),
      directory: "mmap".to_string(),
      lock_factory: "native".to_string(),
      commit_interval_secs: 30,
      close_if_idle: false,
      idle_check_interval_secs: 300,
      writer_memory_mb: 50,
    }
  }
}

impl IndexConfig {
  pub fn commit_interval(&self) -> Duration {
    Duration::from_secs(self.commit_interval_secs)
  }

  pub fn idle_check_interval(&self) -> Duration {
    Duration::from_secs(self.idle_check_interval_secs)
  }

  pub fn writer_memory_bytes(&self) -> usize {
    self.writer_memory_mb.saturating_mul(1024 * 1024)
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  pub log_rotation: String,

  /// How long shutdown waits for actors to terminate
  pub shutdown_timeout_secs: u64,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
      shutdown_timeout_secs: 10,
    }
  }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub node: NodeConfig,
  pub index: IndexConfig,
  pub daemon: DaemonConfig,
}

impl Config {
  /// Load the user config, falling back to defaults when there is none.
  pub fn load() -> Result<Self, ConfigError> {
    match Self::user_config_path() {
      Some(path) if path.exists() => Self::load_from(&path),
      _ => Ok(Self::default()),
    }
  }

  /// Load an explicit config file. A missing file is an error here.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("sleuth").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("sleuth").join("config.toml"))
  }

  /// Socket the node listens on; see [`default_socket_path`] when unset.
  pub fn socket_path(&self) -> PathBuf {
    self.node.socket_path.clone().unwrap_or_else(default_socket_path)
  }

  /// Base directory for node data such as background daemon logs.
  ///
  /// `DATA_DIR` wins, then `XDG_DATA_HOME/sleuth`, then the platform's local
  /// data directory.
  pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DATA_DIR") {
      return PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME") {
      return PathBuf::from(dir).join("sleuth");
    }
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("sleuth")
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_secs(self.daemon.shutdown_timeout_secs)
  }
}

// ============================================================================
// Default Locations
// ============================================================================

/// Per-session socket under `XDG_RUNTIME_DIR`, or a per-user one in `/tmp`.
pub fn default_socket_path() -> PathBuf {
  socket_path_in(std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from))
}

fn socket_path_in(runtime_dir: Option<PathBuf>) -> PathBuf {
  match runtime_dir {
    Some(dir) if !dir.as_os_str().is_empty() => dir.join("sleuth.sock"),
    _ => {
      // SAFETY: getuid has no preconditions and cannot fail
      let uid = unsafe { libc::getuid() };
      PathBuf::from(format!("/tmp/sleuth-{uid}.sock"))
    }
  }
}
