//! IndexActor - one open index behind one mailbox
//!
//! Owns the engine writer, the read view and the sequence checkpoints of a
//! single index. All mutation goes through the actor's dispatch loop, so the
//! checkpoints need no synchronization.
//!
//! # Checkpoints
//!
//! ```text
//! set_update_seq(n) ─▶ pending_seq ──commit──▶ update_seq (durable)
//! set_purge_seq(n)  ─▶ pending_purge_seq ──commit──▶ purge_seq (durable)
//! ```
//!
//! The getters only ever report durable values. A commit writes the pending
//! values into the engine commit metadata and advances the durable values
//! only once the engine commit succeeded.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::{
  ServerState,
  runtime::{Actor, ActorError, CallReply, Context},
};
use crate::{
  engine::{CommitData, Document, EngineError, IndexWriter, QueryParser, SearcherManager, close_index},
  ipc::{Caller, Term, envelope},
  node::ExitReason,
};

const DEFAULT_QUERY: &str = "*:*";
const DEFAULT_LIMIT: usize = 25;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
  #[error("Missing dependency: {0}")]
  MissingDependency(&'static str),
  #[error("Engine error: {0}")]
  Engine(#[from] EngineError),
}

// ============================================================================
// Builder
// ============================================================================

/// Collects the four dependencies an [`IndexActor`] cannot run without.
#[derive(Default)]
pub struct IndexActorBuilder {
  state: Option<Arc<ServerState>>,
  name: Option<String>,
  writer: Option<Box<dyn IndexWriter>>,
  query_parser: Option<QueryParser>,
}

impl IndexActorBuilder {
  pub fn state(mut self, state: Arc<ServerState>) -> Self {
    self.state = Some(state);
    self
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn writer(mut self, writer: Box<dyn IndexWriter>) -> Self {
    self.writer = Some(writer);
    self
  }

  pub fn query_parser(mut self, parser: QueryParser) -> Self {
    self.query_parser = Some(parser);
    self
  }

  /// Validate dependencies, open the read view and load the durable
  /// checkpoints. On failure the writer is closed before returning.
  pub fn build(self) -> Result<IndexActor, IndexError> {
    let IndexActorBuilder {
      state,
      name,
      writer,
      query_parser,
    } = self;
    let (state, name, writer, parser) = match (state, name, writer, query_parser) {
      (Some(state), Some(name), Some(writer), Some(parser)) => (state, name, writer, parser),
      (state, name, writer, _) => {
        let missing = if state.is_none() {
          "state"
        } else if name.is_none() {
          "name"
        } else if writer.is_none() {
          "writer"
        } else {
          "query_parser"
        };
        if let Some(writer) = writer
          && let Err(e) = close_index(None, Some(writer))
        {
          error!(error = %e, "Failed to close writer of incomplete index");
        }
        return Err(IndexError::MissingDependency(missing));
      }
    };

    let opened = writer
      .searcher_manager()
      .and_then(|searcher| Ok((searcher, writer.commit_data()?)));
    let (searcher, data) = match opened {
      Ok(opened) => opened,
      Err(e) => {
        if let Err(close_err) = close_index(None, Some(writer)) {
          error!(index = %name, error = %close_err, "Failed to close writer after open failure");
        }
        return Err(e.into());
      }
    };

    Ok(IndexActor {
      state,
      name,
      writer: Some(writer),
      searcher: Some(searcher),
      parser,
      update_seq: data.update_seq,
      pending_seq: data.update_seq,
      purge_seq: data.purge_seq,
      pending_purge_seq: data.purge_seq,
      committing: false,
      idle: false,
      force_refresh: false,
    })
  }
}

// ============================================================================
// IndexActor
// ============================================================================

pub struct IndexActor {
  state: Arc<ServerState>,
  name: String,
  writer: Option<Box<dyn IndexWriter>>,
  searcher: Option<Box<dyn SearcherManager>>,
  parser: QueryParser,
  update_seq: i64,
  pending_seq: i64,
  purge_seq: i64,
  pending_purge_seq: i64,
  /// Set for the duration of one commit.
  committing: bool,
  /// No call seen since the last idle check.
  idle: bool,
  /// A commit happened since the read view was last reloaded.
  force_refresh: bool,
}

/// Options of a `search` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
  pub query: String,
  pub refresh: bool,
  pub limit: usize,
  pub partition: Option<String>,
}

impl SearchRequest {
  /// `None` when `options` is not a map/proplist or an option has the wrong type.
  pub fn from_term(options: &Term) -> Option<Self> {
    options.entries()?;
    let query = match options.option("query") {
      Some(q) => q.as_str()?.to_string(),
      None => DEFAULT_QUERY.to_string(),
    };
    let refresh = match options.option("refresh") {
      Some(r) => r.as_bool()?,
      None => true,
    };
    let limit = match options.option("limit") {
      Some(l) => usize::try_from(l.as_i64()?).ok()?,
      None => DEFAULT_LIMIT,
    };
    let partition = match options.option("partition") {
      Some(p) => Some(p.as_str()?.to_string()),
      None => None,
    };
    Some(Self {
      query,
      refresh,
      limit,
      partition,
    })
  }
}

impl IndexActor {
  pub fn builder() -> IndexActorBuilder {
    IndexActorBuilder::default()
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Release engine resources of an actor that was never started.
  pub fn discard(mut self) {
    if let Err(e) = close_index(self.searcher.take(), self.writer.take()) {
      error!(index = %self.name, error = %e, "Error closing discarded index");
    }
  }

  fn writer(&mut self) -> Result<&mut (dyn IndexWriter + 'static), ActorError> {
    self
      .writer
      .as_deref_mut()
      .ok_or_else(|| ActorError::Failed(format!("index {} is closed", self.name)))
  }

  fn searcher(&mut self) -> Result<&mut (dyn SearcherManager + 'static), ActorError> {
    self
      .searcher
      .as_deref_mut()
      .ok_or_else(|| ActorError::Failed(format!("index {} is closed", self.name)))
  }

  fn call(&mut self, request: Term) -> Result<CallReply, ActorError> {
    match request.as_atom() {
      Some("get_update_seq") => return Ok(CallReply::Reply(Term::ok_with(Term::Int(self.update_seq)))),
      Some("get_purge_seq") => return Ok(CallReply::Reply(Term::ok_with(Term::Int(self.purge_seq)))),
      Some("info") => return self.info(),
      _ => {}
    }
    let Some((command, args)) = request.as_command() else {
      return Ok(CallReply::Unhandled);
    };
    match (command, args) {
      // `commit` is the old name of set_update_seq
      ("set_update_seq" | "commit", [Term::Int(seq)]) => Ok(self.set_update_seq(*seq)),
      ("set_purge_seq", [Term::Int(seq)]) => Ok(self.set_purge_seq(*seq)),
      ("delete", [id]) => match id.as_str() {
        Some(id) => self.delete(id),
        None => Ok(CallReply::Unhandled),
      },
      ("update", [id, fields]) => match id.as_str() {
        Some(id) => self.update(id, fields),
        None => Ok(CallReply::Unhandled),
      },
      ("search", [options]) => match SearchRequest::from_term(options) {
        Some(request) => self.search(&request),
        None => Ok(CallReply::Unhandled),
      },
      _ => Ok(CallReply::Unhandled),
    }
  }

  fn set_update_seq(&mut self, seq: i64) -> CallReply {
    if seq < self.update_seq {
      return CallReply::Reply(invalid_seq(seq));
    }
    self.pending_seq = seq;
    CallReply::Reply(Term::ok())
  }

  fn set_purge_seq(&mut self, seq: i64) -> CallReply {
    if seq < self.purge_seq {
      return CallReply::Reply(invalid_seq(seq));
    }
    self.pending_purge_seq = seq;
    CallReply::Reply(Term::ok())
  }

  fn delete(&mut self, id: &str) -> Result<CallReply, ActorError> {
    self.writer()?.delete_documents(id)?;
    Ok(CallReply::Reply(Term::ok()))
  }

  fn update(&mut self, id: &str, fields: &Term) -> Result<CallReply, ActorError> {
    let doc = match Document::from_terms(id, fields) {
      Ok(doc) => doc,
      Err(e) => return Ok(CallReply::Reply(Term::error(Term::binary(e.to_string())))),
    };
    self.writer()?.update_document(&doc)?;
    Ok(CallReply::Reply(Term::ok()))
  }

  fn search(&mut self, request: &SearchRequest) -> Result<CallReply, ActorError> {
    let query = match self.parser.parse(&request.query, request.partition.as_deref()) {
      Ok(query) => query,
      Err(e) => {
        debug!(index = %self.name, query = %request.query, error = %e, "Query parse failed");
        return Ok(CallReply::Reply(Term::error(Term::tuple([
          Term::atom("query_parse_error"),
          Term::binary(e.to_string()),
        ]))));
      }
    };
    if request.refresh && self.force_refresh {
      self.searcher()?.maybe_refresh()?;
      self.force_refresh = false;
    }
    let hits = self.searcher()?.search(query.as_ref(), request.limit)?;
    Ok(CallReply::Reply(Term::ok_with(hits.to_term())))
  }

  fn info(&mut self) -> Result<CallReply, ActorError> {
    let stats = self.searcher()?.stats()?;
    let disk_size = self.writer()?.disk_size();
    Ok(CallReply::Reply(Term::ok_with(Term::list([
      Term::pair("doc_count", Term::Int(stats.doc_count as i64)),
      Term::pair("doc_del_count", Term::Int(stats.deleted_docs as i64)),
      Term::pair("pending_seq", Term::Int(self.pending_seq)),
      Term::pair("committed_seq", Term::Int(self.update_seq)),
      Term::pair("purge_seq", Term::Int(self.purge_seq)),
      Term::pair("disk_size", Term::Int(disk_size as i64)),
    ]))))
  }

  /// Persist pending checkpoints together with all buffered changes.
  fn commit(&mut self) -> Result<(), ActorError> {
    if self.committing || (self.pending_seq == self.update_seq && self.pending_purge_seq == self.purge_seq) {
      return Ok(());
    }
    let data = CommitData {
      update_seq: self.pending_seq,
      purge_seq: self.pending_purge_seq,
    };
    self.committing = true;
    let result = self.writer().and_then(|writer| writer.commit(&data).map_err(ActorError::from));
    self.committing = false;
    result?;

    self.update_seq = data.update_seq;
    self.purge_seq = data.purge_seq;
    self.force_refresh = true;
    debug!(index = %self.name, update_seq = data.update_seq, purge_seq = data.purge_seq, "Index committed");
    Ok(())
  }

  fn check_idle(&mut self, ctx: &mut Context) {
    if self.idle {
      info!(index = %self.name, "Closing idle index");
      ctx.exit(ExitReason::Normal);
    } else {
      self.idle = true;
    }
  }
}

fn invalid_seq(seq: i64) -> Term {
  Term::error(Term::tuple([Term::atom("invalid_seq"), Term::Int(seq)]))
}

impl Actor for IndexActor {
  fn init(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
    let config = &self.state.config.index;
    ctx.send_interval(config.commit_interval(), envelope::cast(Term::atom("commit")));
    if config.close_if_idle {
      ctx.send_interval(config.idle_check_interval(), envelope::cast(Term::atom("close_if_idle")));
    }
    info!(
      index = %self.name,
      pid = %ctx.self_pid(),
      update_seq = self.update_seq,
      purge_seq = self.purge_seq,
      "Index opened"
    );
    Ok(())
  }

  fn handle_call(&mut self, _ctx: &mut Context, _from: &Caller, request: Term) -> Result<CallReply, ActorError> {
    self.idle = false;
    let result = self.call(request);
    if let Err(e) = &result {
      error!(index = %self.name, error = %e, "Index operation failed");
    }
    result
  }

  fn handle_cast(&mut self, ctx: &mut Context, request: Term) -> Result<(), ActorError> {
    match request.as_atom() {
      Some("commit") => self.commit().inspect_err(|e| error!(index = %self.name, error = %e, "Commit failed")),
      Some("close_if_idle") => {
        self.check_idle(ctx);
        Ok(())
      }
      Some("close") => {
        ctx.exit(ExitReason::Normal);
        Ok(())
      }
      _ => {
        debug!(index = %self.name, %request, "Ignoring unknown cast");
        Ok(())
      }
    }
  }

  fn handle_info(&mut self, _ctx: &mut Context, msg: Term) -> Result<(), ActorError> {
    if msg.is_atom("commit") {
      return self.commit().inspect_err(|e| error!(index = %self.name, error = %e, "Commit failed"));
    }
    debug!(index = %self.name, %msg, "Ignoring unknown info");
    Ok(())
  }

  fn terminate(&mut self, _ctx: &mut Context, reason: &ExitReason) {
    match close_index(self.searcher.take(), self.writer.take()) {
      Ok(()) => info!(index = %self.name, %reason, "Index closed"),
      Err(e) => error!(index = %self.name, %reason, error = %e, "Error closing index"),
    }
  }
}
