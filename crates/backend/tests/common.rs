//! Common test utilities for socket integration tests
//!
//! Starts a full daemon (node, index manager, socket gateway) on a socket
//! inside a temporary directory.

use std::{path::PathBuf, time::Duration};

use sleuth::{
  Daemon, DaemonError, RuntimeConfig,
  config::Config,
  ipc::{Client, Term},
};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestDaemon {
  pub socket_path: PathBuf,
  pub index_dir: PathBuf,
  cancel: CancellationToken,
  handle: JoinHandle<Result<(), DaemonError>>,
  _dir: TempDir,
}

impl TestDaemon {
  pub async fn start() -> Self {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let socket_path = dir.path().join("sleuth.sock");
    let index_dir = dir.path().join("indexes");

    let mut config = Config::default();
    config.node.socket_path = Some(socket_path.clone());
    config.index.dir = index_dir.clone();
    config.index.commit_interval_secs = 0;
    config.index.writer_memory_mb = 15;

    let cancel = CancellationToken::new();
    let daemon = Daemon::new(RuntimeConfig::from_config(config));
    let handle = tokio::spawn(daemon.run_until(cancel.clone()));

    for _ in 0..100 {
      if socket_path.exists() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }

    Self {
      socket_path,
      index_dir,
      cancel,
      handle,
      _dir: dir,
    }
  }

  pub async fn connect(&self) -> Client {
    Client::connect(&self.socket_path)
      .await
      .expect("Failed to connect to daemon")
  }

  /// Cancel the daemon and wait for it to shut down.
  pub async fn stop(self) {
    self.cancel.cancel();
    self
      .handle
      .await
      .expect("daemon task panicked")
      .expect("daemon returned an error");
  }
}

/// `[{Name, Value}]` with binary names and values.
#[allow(dead_code)]
pub fn fields(pairs: &[(&str, &str)]) -> Term {
  Term::List(
    pairs
      .iter()
      .map(|(name, value)| Term::tuple([Term::binary(*name), Term::binary(*value)]))
      .collect(),
  )
}
