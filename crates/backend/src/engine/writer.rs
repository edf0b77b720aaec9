//! tantivy-backed [`IndexWriter`] and [`SearcherManager`].

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use serde_json::Value;
use tantivy::{
  Document as _, Index, IndexReader, ReloadPolicy, TantivyDocument, Term as EngineTerm,
  collector::{Count, TopDocs},
  directory::Directory,
  query::Query,
  schema::Schema,
};
use tracing::{debug, trace};

use super::{
  CommitData, EngineError, Hit, IndexStats, IndexWriter, SearcherManager, TopHits,
  analyzer::{AnalyzerSpec, TOKENIZER},
  directory::{self, IndexLock},
  document::{self, Document, IndexFields},
  query::QueryParser,
};

/// tantivy refuses smaller per-thread budgets.
const MIN_WRITER_MEMORY: usize = 15_000_000;

pub struct TantivyWriter {
  index: Index,
  writer: tantivy::IndexWriter,
  schema: Schema,
  fields: IndexFields,
  path: PathBuf,
  lock: Option<Box<dyn IndexLock>>,
}

impl TantivyWriter {
  /// Open or create the index in `directory`. `lock` is held until
  /// [`IndexWriter::close`]; on failure it is dropped, which releases it.
  pub fn open(
    directory: Box<dyn Directory>,
    path: &Path,
    analyzer: &AnalyzerSpec,
    lock: Box<dyn IndexLock>,
    memory_bytes: usize,
  ) -> Result<Self, EngineError> {
    let schema = document::build_schema();
    let index = Index::open_or_create(directory, schema.clone())?;
    index.tokenizers().register(TOKENIZER, analyzer.build());
    let fields = IndexFields::resolve(&schema)?;
    let writer = index.writer_with_num_threads(1, memory_bytes.max(MIN_WRITER_MEMORY))?;
    debug!(path = %path.display(), "Index writer opened");
    Ok(Self {
      index,
      writer,
      schema,
      fields,
      path: path.to_path_buf(),
      lock: Some(lock),
    })
  }

  pub fn query_parser(&self) -> QueryParser {
    QueryParser::new(&self.index, self.fields.default, self.fields.partition)
  }
}

impl IndexWriter for TantivyWriter {
  fn update_document(&mut self, doc: &Document) -> Result<(), EngineError> {
    let native = doc.to_native(&self.schema)?;
    self
      .writer
      .delete_term(EngineTerm::from_field_text(self.fields.id, &doc.id));
    self.writer.add_document(native)?;
    Ok(())
  }

  fn delete_documents(&mut self, id: &str) -> Result<(), EngineError> {
    self.writer.delete_term(EngineTerm::from_field_text(self.fields.id, id));
    Ok(())
  }

  fn commit(&mut self, data: &CommitData) -> Result<(), EngineError> {
    let mut prepared = self.writer.prepare_commit()?;
    prepared.set_payload(&data.to_payload());
    let opstamp = prepared.commit()?;
    trace!(path = %self.path.display(), opstamp, "Index committed");
    Ok(())
  }

  fn commit_data(&self) -> Result<CommitData, EngineError> {
    let metas = self.index.load_metas()?;
    CommitData::from_payload(metas.payload.as_deref())
  }

  fn searcher_manager(&self) -> Result<Box<dyn SearcherManager>, EngineError> {
    let reader = self
      .index
      .reader_builder()
      .reload_policy(ReloadPolicy::Manual)
      .try_into()?;
    Ok(Box::new(TantivySearcher {
      reader,
      schema: self.schema.clone(),
    }))
  }

  fn disk_size(&self) -> u64 {
    directory::disk_size(&self.path)
  }

  fn close(self: Box<Self>) -> Result<(), EngineError> {
    let TantivyWriter { writer, lock, path, .. } = *self;
    // Uncommitted operations are discarded here.
    let merged = writer.wait_merging_threads();
    let released = match lock {
      Some(lock) => lock.release(),
      None => Ok(()),
    };
    debug!(path = %path.display(), "Index writer closed");
    merged?;
    released
  }
}

// ============================================================================
// Searcher
// ============================================================================

pub struct TantivySearcher {
  reader: IndexReader,
  schema: Schema,
}

impl TantivySearcher {
  fn hit(&self, searcher: &tantivy::Searcher, score: f32, addr: tantivy::DocAddress) -> Result<Hit, EngineError> {
    let native: TantivyDocument = searcher.doc(addr)?;
    let mut stored: BTreeMap<String, Vec<Value>> = serde_json::from_str(&native.to_json(&self.schema))?;
    let id = stored
      .remove(document::ID)
      .and_then(|values| values.into_iter().next())
      .and_then(|value| value.as_str().map(str::to_string))
      .unwrap_or_default();
    let fields = match stored.remove(document::SOURCE).and_then(|values| values.into_iter().next()) {
      Some(Value::Object(fields)) => fields,
      _ => serde_json::Map::new(),
    };
    Ok(Hit {
      score,
      doc: (u64::from(addr.segment_ord) << 32) | u64::from(addr.doc_id),
      id,
      fields,
    })
  }
}

impl SearcherManager for TantivySearcher {
  fn maybe_refresh(&mut self) -> Result<(), EngineError> {
    self.reader.reload()?;
    Ok(())
  }

  fn search(&self, query: &dyn Query, limit: usize) -> Result<TopHits, EngineError> {
    let searcher = self.reader.searcher();
    // The collector preallocates `limit` slots; more than the live docs is never needed
    let limit = limit.min(usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX));
    if limit == 0 {
      let total_hits = searcher.search(query, &Count)?;
      return Ok(TopHits {
        total_hits,
        hits: Vec::new(),
      });
    }
    let (top, total_hits) = searcher.search(query, &(TopDocs::with_limit(limit), Count))?;
    let hits = top
      .into_iter()
      .map(|(score, addr)| self.hit(&searcher, score, addr))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(TopHits { total_hits, hits })
  }

  fn stats(&self) -> Result<IndexStats, EngineError> {
    let searcher = self.reader.searcher();
    let deleted_docs = searcher
      .segment_readers()
      .iter()
      .map(|segment| u64::from(segment.num_deleted_docs()))
      .sum();
    Ok(IndexStats {
      doc_count: searcher.num_docs(),
      deleted_docs,
    })
  }

  fn close(self: Box<Self>) -> Result<(), EngineError> {
    Ok(())
  }
}
