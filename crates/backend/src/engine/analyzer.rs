//! Analyzer factory.
//!
//! Turns the analyzer configuration sent with `open` into a tantivy
//! tokenizer pipeline. The configuration is either a bare name
//! (`<<"standard">>`) or a map/proplist with a `name` and optional
//! `stopwords` list.

use tantivy::tokenizer::{
  Language, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer,
  WhitespaceTokenizer,
};

use super::EngineError;
use crate::ipc::Term;

/// Name the analyzer is registered under in every index.
pub const TOKENIZER: &str = "sleuth";

const MAX_TOKEN_LEN: usize = 255;

const ENGLISH_STOP_WORDS: &[&str] = &[
  "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it", "no", "not", "of", "on",
  "or", "such", "that", "the", "their", "then", "there", "these", "they", "this", "to", "was", "will", "with",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalyzerKind {
  /// Word tokens, lowercased, English stop words removed.
  Standard,
  /// Word tokens, lowercased.
  Simple,
  Whitespace,
  /// The whole value is one token.
  Keyword,
  /// Standard pipeline plus a snowball stemmer.
  Stemming(Language),
}

impl AnalyzerKind {
  pub fn from_name(name: &str) -> Option<Self> {
    let kind = match name {
      "standard" => AnalyzerKind::Standard,
      "simple" => AnalyzerKind::Simple,
      "whitespace" => AnalyzerKind::Whitespace,
      "keyword" => AnalyzerKind::Keyword,
      "arabic" => AnalyzerKind::Stemming(Language::Arabic),
      "danish" => AnalyzerKind::Stemming(Language::Danish),
      "dutch" => AnalyzerKind::Stemming(Language::Dutch),
      "english" => AnalyzerKind::Stemming(Language::English),
      "finnish" => AnalyzerKind::Stemming(Language::Finnish),
      "french" => AnalyzerKind::Stemming(Language::French),
      "german" => AnalyzerKind::Stemming(Language::German),
      "greek" => AnalyzerKind::Stemming(Language::Greek),
      "hungarian" => AnalyzerKind::Stemming(Language::Hungarian),
      "italian" => AnalyzerKind::Stemming(Language::Italian),
      "norwegian" => AnalyzerKind::Stemming(Language::Norwegian),
      "portuguese" => AnalyzerKind::Stemming(Language::Portuguese),
      "romanian" => AnalyzerKind::Stemming(Language::Romanian),
      "russian" => AnalyzerKind::Stemming(Language::Russian),
      "spanish" => AnalyzerKind::Stemming(Language::Spanish),
      "swedish" => AnalyzerKind::Stemming(Language::Swedish),
      "tamil" => AnalyzerKind::Stemming(Language::Tamil),
      "turkish" => AnalyzerKind::Stemming(Language::Turkish),
      _ => return None,
    };
    Some(kind)
  }

  fn default_stopwords(&self) -> Vec<String> {
    match self {
      AnalyzerKind::Standard | AnalyzerKind::Stemming(Language::English) => {
        ENGLISH_STOP_WORDS.iter().map(|w| w.to_string()).collect()
      }
      _ => Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSpec {
  pub kind: AnalyzerKind,
  /// Overrides the analyzer's default stop words when present.
  pub stopwords: Option<Vec<String>>,
}

impl AnalyzerSpec {
  pub fn from_term(config: &Term) -> Result<Self, EngineError> {
    if let Some(name) = config.as_str() {
      return Self::named(name, None);
    }
    if config.entries().is_none() {
      return Err(EngineError::Analyzer(config.to_string()));
    }
    let name = config
      .option("name")
      .and_then(Term::as_str)
      .ok_or_else(|| EngineError::Analyzer(format!("missing analyzer name in {config}")))?;
    let stopwords = match config.option("stopwords") {
      None => None,
      Some(words) => {
        let words = words
          .as_list()
          .and_then(|items| items.iter().map(|w| w.as_str().map(str::to_lowercase)).collect::<Option<Vec<_>>>())
          .ok_or_else(|| EngineError::Analyzer(format!("stopwords must be a list of strings, got {words}")))?;
        Some(words)
      }
    };
    Self::named(name, stopwords)
  }

  fn named(name: &str, stopwords: Option<Vec<String>>) -> Result<Self, EngineError> {
    let kind = AnalyzerKind::from_name(name).ok_or_else(|| EngineError::Analyzer(name.to_string()))?;
    Ok(Self { kind, stopwords })
  }

  pub fn build(&self) -> TextAnalyzer {
    let stopwords = self.stopwords.clone().unwrap_or_else(|| self.kind.default_stopwords());
    match self.kind {
      AnalyzerKind::Standard => TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stopwords))
        .build(),
      AnalyzerKind::Simple => TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stopwords))
        .build(),
      AnalyzerKind::Whitespace => TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(StopWordFilter::remove(stopwords))
        .build(),
      AnalyzerKind::Keyword => TextAnalyzer::builder(RawTokenizer::default()).build(),
      AnalyzerKind::Stemming(language) => TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stopwords))
        .filter(Stemmer::new(language))
        .build(),
    }
  }
}
