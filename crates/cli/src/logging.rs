//! Logging setup for one-shot commands and the daemon

use sleuth::config::{Config, DaemonConfig};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "sleuth.log";

/// Directory background daemon logs are written to
pub fn log_dir() -> PathBuf {
  Config::data_dir().join("logs")
}

/// Console logging for one-shot commands. Quiet unless `RUST_LOG` says otherwise.
pub fn init_cli_logging() {
  let env_filter = EnvFilter::builder()
    .with_default_directive(tracing::Level::WARN.into())
    .from_env_lossy();
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing_subscriber::filter::LevelFilter {
  use tracing_subscriber::filter::LevelFilter;

  match level.to_lowercase().as_str() {
    "off" => LevelFilter::OFF,
    "error" => LevelFilter::ERROR,
    "warn" => LevelFilter::WARN,
    "debug" => LevelFilter::DEBUG,
    "trace" => LevelFilter::TRACE,
    _ => LevelFilter::INFO,
  }
}

/// Initialize daemon logging from the `[daemon]` config section.
///
/// In foreground mode logs go to the console with colors. In background
/// mode they go to a rolling file under [`log_dir`] without ANSI codes.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_daemon_logging(config: &DaemonConfig, foreground: bool) -> Option<WorkerGuard> {
  // RUST_LOG still overrides the configured level
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.log_level).into())
    .from_env_lossy();

  if foreground {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let dir = log_dir();
  if std::fs::create_dir_all(&dir).is_err() {
    init_cli_logging();
    return None;
  }

  let file_appender = match config.log_rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&dir, LOG_FILE),
    "never" => tracing_appender::rolling::never(&dir, LOG_FILE),
    _ => tracing_appender::rolling::daily(&dir, LOG_FILE),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
