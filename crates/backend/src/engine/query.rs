//! Query text to engine queries.
//!
//! Unqualified terms search the `default` catch-all. `name:value` clauses
//! whose field is not a schema field are rewritten into the indexed JSON
//! object (`fields.name:value`). A partition turns the query into a
//! conjunction with an exact match on `_partition`.

use tantivy::{
  Index, Term as EngineTerm,
  query::{AllQuery, BooleanQuery, Occur, Query, QueryParserError, TermQuery},
  schema::{Field, IndexRecordOption},
};

use super::document::{FIELDS, SCHEMA_FIELDS};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct QueryError(#[from] QueryParserError);

pub struct QueryParser {
  parser: tantivy::query::QueryParser,
  partition: Field,
}

impl QueryParser {
  pub fn new(index: &Index, default: Field, partition: Field) -> Self {
    Self {
      parser: tantivy::query::QueryParser::for_index(index, vec![default]),
      partition,
    }
  }

  pub fn parse(&self, text: &str, partition: Option<&str>) -> Result<Box<dyn Query>, QueryError> {
    let query = self.parse_text(text)?;
    let Some(partition) = partition else {
      return Ok(query);
    };
    let partition = TermQuery::new(
      EngineTerm::from_field_text(self.partition, partition),
      IndexRecordOption::Basic,
    );
    Ok(Box::new(BooleanQuery::new(vec![
      (Occur::Must, Box::new(partition)),
      (Occur::Must, query),
    ])))
  }

  fn parse_text(&self, text: &str) -> Result<Box<dyn Query>, QueryError> {
    let text = text.trim();
    if matches!(text, "" | "*" | "*:*") {
      return Ok(Box::new(AllQuery));
    }
    Ok(self.parser.parse_query(&qualify_field_names(text, SCHEMA_FIELDS))?)
  }
}

fn is_field_char(c: char) -> bool {
  c.is_alphanumeric() || matches!(c, '_' | '.' | '@')
}

fn is_reserved(name: &str, reserved: &[&str]) -> bool {
  reserved
    .iter()
    .any(|r| name == *r || name.strip_prefix(r).is_some_and(|rest| rest.starts_with('.')))
}

/// Prefix every `name:` clause outside quoted phrases with `fields.` unless
/// `name` is (a path below) one of `reserved`.
pub fn qualify_field_names(text: &str, reserved: &[&str]) -> String {
  let chars: Vec<char> = text.chars().collect();
  let mut out = String::with_capacity(text.len() + 16);
  let mut in_quotes = false;
  let mut i = 0;
  while i < chars.len() {
    let c = chars[i];
    if c == '\\' {
      out.push(c);
      if let Some(next) = chars.get(i + 1) {
        out.push(*next);
      }
      i += 2;
      continue;
    }
    if c == '"' {
      in_quotes = !in_quotes;
      out.push(c);
      i += 1;
      continue;
    }
    let at_boundary = i == 0 || matches!(chars[i - 1], '(' | '+' | '-' | '!') || chars[i - 1].is_whitespace();
    if !in_quotes && at_boundary && is_field_char(c) {
      let end = (i..chars.len()).find(|&j| !is_field_char(chars[j])).unwrap_or(chars.len());
      let name: String = chars[i..end].iter().collect();
      if chars.get(end) == Some(&':') && !is_reserved(&name, reserved) {
        out.push_str(FIELDS);
        out.push('.');
      }
      out.push_str(&name);
      i = end;
      continue;
    }
    out.push(c);
    i += 1;
  }
  out
}
