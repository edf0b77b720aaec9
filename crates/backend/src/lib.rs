pub mod actor;
pub mod engine;
pub mod node;
mod server;

mod domain;
pub use domain::config;

pub mod ipc;

mod daemon;
pub use daemon::{Daemon, DaemonError, RuntimeConfig};
pub use server::Server;
