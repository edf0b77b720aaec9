//! Full-text engine boundary.
//!
//! The index actor only sees the [`IndexWriter`] and [`SearcherManager`]
//! traits; the tantivy-backed implementations live in [`writer`]. Analyzer
//! selection, storage selection and document/query translation are the
//! other collaborators the manager wires together when an index is opened.
//!
//! # Architecture
//!
//! ```text
//! IndexManager::open
//!   ├── AnalyzerSpec::from_term      (analyzer)
//!   ├── StorageRegistry              (lock factory + directory by id)
//!   └── TantivyWriter::open          (IndexWriter)
//!         ├── searcher_manager()     (SearcherManager, manual reload)
//!         └── query_parser()         (QueryParser)
//! ```

pub mod analyzer;
pub mod directory;
pub mod document;
pub mod query;
pub mod writer;

use std::collections::BTreeMap;

pub use analyzer::AnalyzerSpec;
pub use directory::{IndexLock, LockFactory, StorageRegistry};
pub use document::{Document, json_to_term, term_to_json};
pub use query::{QueryError, QueryParser};
pub use tantivy::query::Query;
use tracing::warn;
pub use writer::TantivyWriter;

use crate::ipc::Term;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Index error: {0}")]
  Index(#[from] tantivy::TantivyError),
  #[error("Cannot open directory: {0}")]
  Directory(#[from] tantivy::directory::error::OpenDirectoryError),
  #[error("Unknown directory implementation: {0}")]
  UnknownDirectory(String),
  #[error("Unknown lock factory: {0}")]
  UnknownLockFactory(String),
  #[error("Lock obtain failed: {0}")]
  LockObtainFailed(String),
  #[error("Unsupported analyzer: {0}")]
  Analyzer(String),
  #[error("Malformed commit metadata {key}={value}")]
  CommitData { key: String, value: String },
  #[error("Invalid document: {0}")]
  Document(String),
  #[error("Corrupt stored fields: {0}")]
  StoredFields(#[from] serde_json::Error),
}

// ============================================================================
// Commit metadata
// ============================================================================

/// Sequence checkpoints persisted with every commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitData {
  pub update_seq: i64,
  pub purge_seq: i64,
}

impl CommitData {
  pub const UPDATE_SEQ: &'static str = "update_seq";
  pub const PURGE_SEQ: &'static str = "purge_seq";

  /// Decimal strings under `update_seq` / `purge_seq`, as a JSON object.
  pub fn to_payload(&self) -> String {
    let map = BTreeMap::from([
      (Self::UPDATE_SEQ, self.update_seq.to_string()),
      (Self::PURGE_SEQ, self.purge_seq.to_string()),
    ]);
    serde_json::to_string(&map).unwrap_or_default()
  }

  /// Missing payload or key reads as 0; anything unparsable is an error.
  pub fn from_payload(payload: Option<&str>) -> Result<Self, EngineError> {
    let Some(payload) = payload.filter(|p| !p.trim().is_empty()) else {
      return Ok(Self::default());
    };
    let map: BTreeMap<String, String> = serde_json::from_str(payload).map_err(|_| EngineError::CommitData {
      key: "payload".to_string(),
      value: payload.to_string(),
    })?;
    let read = |key: &str| -> Result<i64, EngineError> {
      match map.get(key) {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| EngineError::CommitData {
          key: key.to_string(),
          value: value.clone(),
        }),
      }
    };
    Ok(Self {
      update_seq: read(Self::UPDATE_SEQ)?,
      purge_seq: read(Self::PURGE_SEQ)?,
    })
  }
}

// ============================================================================
// Search results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
  pub score: f32,
  /// Engine-internal document number, stable within one read view.
  pub doc: u64,
  pub id: String,
  pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopHits {
  pub total_hits: usize,
  pub hits: Vec<Hit>,
}

impl TopHits {
  /// `[{total_hits, N}, {hits, [{hit, [Score, Doc], Fields}]}]`
  pub fn to_term(&self) -> Term {
    let hits = self
      .hits
      .iter()
      .map(|hit| {
        let mut fields = vec![Term::tuple([Term::binary("_id"), Term::binary(hit.id.as_str())])];
        fields.extend(
          hit
            .fields
            .iter()
            .map(|(name, value)| Term::tuple([Term::binary(name.as_str()), json_to_term(value)])),
        );
        Term::tuple([
          Term::atom("hit"),
          Term::list([Term::Float(f64::from(hit.score)), Term::Int(hit.doc as i64)]),
          Term::List(fields),
        ])
      })
      .collect::<Vec<_>>();
    Term::list([
      Term::pair("total_hits", Term::Int(self.total_hits as i64)),
      Term::pair("hits", Term::List(hits)),
    ])
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
  pub doc_count: u64,
  pub deleted_docs: u64,
}

// ============================================================================
// Engine traits
// ============================================================================

/// Write side of one open index.
pub trait IndexWriter: Send {
  /// Replace every document carrying `doc.id` with `doc`.
  fn update_document(&mut self, doc: &Document) -> Result<(), EngineError>;

  /// Delete every document whose external id is `id`.
  fn delete_documents(&mut self, id: &str) -> Result<(), EngineError>;

  /// Make all changes durable together with `data`.
  fn commit(&mut self, data: &CommitData) -> Result<(), EngineError>;

  /// Metadata of the last durable commit.
  fn commit_data(&self) -> Result<CommitData, EngineError>;

  fn searcher_manager(&self) -> Result<Box<dyn SearcherManager>, EngineError>;

  /// Bytes used on disk; 0 for memory-backed indexes.
  fn disk_size(&self) -> u64;

  fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Read views over an index. A view only moves forward on `maybe_refresh`.
pub trait SearcherManager: Send {
  fn maybe_refresh(&mut self) -> Result<(), EngineError>;

  fn search(&self, query: &dyn Query, limit: usize) -> Result<TopHits, EngineError>;

  fn stats(&self) -> Result<IndexStats, EngineError>;

  fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Close the read view and then the writer. Both are always attempted; the
/// first failure is returned and any later one is only logged.
pub fn close_index(
  searcher: Option<Box<dyn SearcherManager>>,
  writer: Option<Box<dyn IndexWriter>>,
) -> Result<(), EngineError> {
  let results = [searcher.map(|s| s.close()), writer.map(|w| w.close())];
  let mut first = None;
  for err in results.into_iter().flatten().filter_map(Result::err) {
    if first.is_none() {
      first = Some(err);
    } else {
      warn!(error = %err, "Suppressed error while closing index");
    }
  }
  first.map_or(Ok(()), Err)
}
