//! IndexManager - registered entry point that opens indexes
//!
//! `open` does its engine work on the blocking pool and answers with a
//! deferred reply, so a slow open never holds up the manager's mailbox.
//! Nothing becomes visible until every step succeeded: a failed open leaves
//! no mailbox, no lock and no writer behind.

use std::{
  path::{Component, Path},
  sync::Arc,
};

use tracing::{debug, info, warn};

use super::{
  ServerState,
  index::{IndexActor, IndexError},
  runtime::{self, Actor, ActorError, CallReply, Context},
};
use crate::{
  engine::{AnalyzerSpec, EngineError, TantivyWriter, directory},
  ipc::{Caller, Pid, Term},
  node::NodeError,
};

/// Well-known name remote callers address the manager by.
pub const MANAGER_NAME: &str = "main";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
  #[error("Invalid index path: {0:?}")]
  InvalidPath(String),
  #[error("{0}")]
  Engine(#[from] EngineError),
  #[error("{0}")]
  Index(#[from] IndexError),
  #[error("Peer {0} is not alive")]
  PeerGone(Pid),
  #[error("{0}")]
  Node(#[from] NodeError),
}

// ============================================================================
// IndexManager
// ============================================================================

pub struct IndexManager {
  state: Arc<ServerState>,
}

impl IndexManager {
  /// Register the manager under [`MANAGER_NAME`] and start it.
  pub fn spawn(state: Arc<ServerState>) -> Result<Pid, NodeError> {
    let node = Arc::clone(&state.node);
    let mailbox = node.create_mailbox();
    node.register(MANAGER_NAME, mailbox.pid())?;
    runtime::start(IndexManager { state }, mailbox)
  }

  fn open(&self, ctx: &Context, from: &Caller, peer: Pid, path: String, analyzer: Term) {
    let state = Arc::clone(&self.state);
    let caller = from.clone();
    ctx.node().runtime().spawn_blocking(move || {
      let response = match open_index(&state, peer, &path, &analyzer) {
        Ok(pid) => {
          info!(index = %path, %pid, %peer, "Opened index");
          Term::ok_with(Term::Pid(pid))
        }
        Err(e) => {
          warn!(index = %path, %peer, error = %e, "Failed to open index");
          Term::error(Term::binary(e.to_string()))
        }
      };
      state.node.reply(&caller, response);
    });
  }

  fn disk_size(&self, path: &str) -> Term {
    match validate_path(path) {
      Ok(relative) => {
        let bytes = directory::disk_size(&self.state.config.index.dir.join(relative));
        Term::ok_with(Term::list([Term::pair("disk_size", Term::Int(bytes as i64))]))
      }
      Err(e) => Term::error(Term::binary(e.to_string())),
    }
  }
}

impl Actor for IndexManager {
  fn init(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
    info!(
      pid = %ctx.self_pid(),
      root = %self.state.config.index.dir.display(),
      "Index manager started"
    );
    Ok(())
  }

  fn handle_call(&mut self, ctx: &mut Context, from: &Caller, request: Term) -> Result<CallReply, ActorError> {
    if request.is_atom("version") {
      return Ok(CallReply::Reply(Term::ok_with(Term::binary(env!("CARGO_PKG_VERSION")))));
    }
    let Some((command, args)) = request.as_command() else {
      return Ok(CallReply::Unhandled);
    };
    match (command, args) {
      ("open", [peer, path, analyzer]) => {
        let (Some(peer), Some(path)) = (peer.as_pid(), path.as_str()) else {
          return Ok(CallReply::Unhandled);
        };
        self.open(ctx, from, peer, path.to_string(), analyzer.clone());
        Ok(CallReply::NoReply)
      }
      ("disk_size", [path]) => match path.as_str() {
        Some(path) => Ok(CallReply::Reply(self.disk_size(path))),
        None => Ok(CallReply::Unhandled),
      },
      _ => Ok(CallReply::Unhandled),
    }
  }

  fn handle_info(&mut self, _ctx: &mut Context, msg: Term) -> Result<(), ActorError> {
    debug!(%msg, "Index manager ignoring info");
    Ok(())
  }
}

/// Index paths are relative to the configured root and may not climb out of it.
pub fn validate_path(path: &str) -> Result<&Path, OpenError> {
  let relative = Path::new(path);
  let safe = !path.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
  if safe {
    Ok(relative)
  } else {
    Err(OpenError::InvalidPath(path.to_string()))
  }
}

fn open_index(state: &Arc<ServerState>, peer: Pid, path: &str, analyzer: &Term) -> Result<Pid, OpenError> {
  let config = &state.config.index;
  let dir = config.dir.join(validate_path(path)?);
  let analyzer = AnalyzerSpec::from_term(analyzer)?;

  let lock = state.storage.lock_factory(&config.lock_factory)?.obtain(&dir)?;
  let directory = state.storage.open_directory(&config.directory, &dir)?;
  let writer = TantivyWriter::open(directory, &dir, &analyzer, lock, config.writer_memory_bytes())?;
  let parser = writer.query_parser();

  let actor = IndexActor::builder()
    .state(Arc::clone(state))
    .name(path)
    .writer(Box::new(writer))
    .query_parser(parser)
    .build()?;

  let mailbox = state.node.create_mailbox();
  if state.node.link(mailbox.pid(), peer).is_err() {
    drop(mailbox);
    actor.discard();
    return Err(OpenError::PeerGone(peer));
  }
  Ok(runtime::start(actor, mailbox)?)
}
