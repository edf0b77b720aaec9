//! IPC module - protocol values and the socket frame protocol
//!
//! A socket connection is one mailbox on the node. Every frame is a JSON
//! object on its own line, tagged by `op`:
//!
//! ```text
//! server → client   {"op":"welcome","pid":7,"node":"sleuth"}
//!                   {"op":"deliver","msg":<Term>}
//! client → server   {"op":"send","to":3|"main","msg":<Term>}
//!                   {"op":"link","to":12}   {"op":"unlink","to":12}
//!                   {"op":"exit","to":12,"reason":<Term>}
//! ```
use serde::{Deserialize, Serialize};

pub mod client;
pub mod envelope;
pub mod term;

pub use client::Client;
pub use envelope::{Caller, Envelope};
pub use term::{Pid, Term};

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum IpcError {
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Connection error: {0}")]
  Connection(String),
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("Protocol error: {0}")]
  Protocol(String),
  #[error("Call timed out")]
  Timeout,
  #[error("Request rejected: {0}")]
  Rejected(String),
}

impl From<serde_json::Error> for IpcError {
  fn from(err: serde_json::Error) -> Self {
    IpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for IpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    IpcError::Codec(err.to_string())
  }
}

// ============================================================================
// Frames
// ============================================================================

/// Destination of a `send` frame: a pid or a registered name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
  Pid(Pid),
  Name(String),
}

impl From<Pid> for Address {
  fn from(pid: Pid) -> Self {
    Address::Pid(pid)
  }
}

impl From<&str> for Address {
  fn from(name: &str) -> Self {
    Address::Name(name.to_string())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
  Welcome { pid: Pid, node: String },
  Deliver { msg: Term },
  Send { to: Address, msg: Term },
  Link { to: Pid },
  Unlink { to: Pid },
  Exit { to: Pid, reason: Term },
}
