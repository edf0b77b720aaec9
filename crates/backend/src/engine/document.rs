//! Wire field lists to engine documents and back.
//!
//! Every index shares one fixed schema. Caller-supplied fields live inside
//! two JSON objects: `fields` holds what is indexed, `_source` what is
//! stored. Indexed string values are also copied into the `default`
//! catch-all so unqualified query terms find them.

use serde_json::{Map, Number, Value};
use tantivy::{
  TantivyDocument,
  schema::{Field, IndexRecordOption, JsonObjectOptions, STORED, STRING, Schema, TextFieldIndexing, TextOptions},
};

use super::{EngineError, analyzer::TOKENIZER};
use crate::ipc::Term;

pub const ID: &str = "_id";
pub const PARTITION: &str = "_partition";
pub const DEFAULT: &str = "default";
pub const FIELDS: &str = "fields";
pub const SOURCE: &str = "_source";

/// Schema field names that query text may address directly.
pub const SCHEMA_FIELDS: &[&str] = &[ID, PARTITION, DEFAULT, FIELDS, SOURCE];

pub fn build_schema() -> Schema {
  let indexing = TextFieldIndexing::default()
    .set_tokenizer(TOKENIZER)
    .set_index_option(IndexRecordOption::WithFreqsAndPositions);

  let mut builder = Schema::builder();
  builder.add_text_field(ID, STRING | STORED);
  builder.add_text_field(PARTITION, STRING);
  builder.add_text_field(DEFAULT, TextOptions::default().set_indexing_options(indexing.clone()));
  builder.add_json_field(FIELDS, JsonObjectOptions::default().set_indexing_options(indexing));
  builder.add_json_field(SOURCE, JsonObjectOptions::default().set_stored());
  builder.build()
}

/// Resolved handles of the fixed schema fields.
#[derive(Debug, Clone, Copy)]
pub struct IndexFields {
  pub id: Field,
  pub partition: Field,
  pub default: Field,
  pub fields: Field,
  pub source: Field,
}

impl IndexFields {
  pub fn resolve(schema: &Schema) -> Result<Self, EngineError> {
    let field = |name: &str| schema.get_field(name).map_err(EngineError::from);
    Ok(Self {
      id: field(ID)?,
      partition: field(PARTITION)?,
      default: field(DEFAULT)?,
      fields: field(FIELDS)?,
      source: field(SOURCE)?,
    })
  }
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
  pub id: String,
  pub partition: Option<String>,
  pub default_text: Vec<String>,
  pub fields: Map<String, Value>,
  pub stored: Map<String, Value>,
}

struct FieldSpec<'a> {
  name: &'a str,
  value: &'a Term,
  store: bool,
  index: bool,
}

impl Document {
  /// Build a document from `[{Name, Value}]`, `[{Name, Value, Options}]`
  /// or a map. Options are `store` and `index`, each `true`/`false` or
  /// `yes`/`no`; both default to true.
  pub fn from_terms(id: &str, fields: &Term) -> Result<Self, EngineError> {
    if id.is_empty() {
      return Err(EngineError::Document("empty document id".to_string()));
    }
    let mut doc = Document {
      id: id.to_string(),
      ..Default::default()
    };
    for spec in field_specs(fields)? {
      doc.add(spec)?;
    }
    Ok(doc)
  }

  fn add(&mut self, spec: FieldSpec<'_>) -> Result<(), EngineError> {
    if spec.name == ID {
      return Err(EngineError::Document(format!("{ID} is reserved")));
    }
    let value = term_to_json(spec.value);
    if spec.name == PARTITION {
      let partition = value
        .as_str()
        .ok_or_else(|| EngineError::Document(format!("{PARTITION} must be a string, got {}", spec.value)))?;
      self.partition = Some(partition.to_string());
    } else if spec.index {
      collect_strings(&value, &mut self.default_text);
      append(&mut self.fields, spec.name, value.clone());
    }
    if spec.store {
      append(&mut self.stored, spec.name, value);
    }
    Ok(())
  }

  pub fn to_native(&self, schema: &Schema) -> Result<TantivyDocument, EngineError> {
    let mut json = Map::new();
    json.insert(ID.to_string(), Value::String(self.id.clone()));
    if let Some(partition) = &self.partition {
      json.insert(PARTITION.to_string(), Value::String(partition.clone()));
    }
    if !self.default_text.is_empty() {
      json.insert(
        DEFAULT.to_string(),
        Value::Array(self.default_text.iter().cloned().map(Value::String).collect()),
      );
    }
    if !self.fields.is_empty() {
      json.insert(FIELDS.to_string(), Value::Object(self.fields.clone()));
    }
    if !self.stored.is_empty() {
      json.insert(SOURCE.to_string(), Value::Object(self.stored.clone()));
    }
    let text = serde_json::to_string(&Value::Object(json))?;
    TantivyDocument::parse_json(schema, &text).map_err(|e| EngineError::Document(e.to_string()))
  }
}

fn field_specs(fields: &Term) -> Result<Vec<FieldSpec<'_>>, EngineError> {
  let invalid = |item: &Term| EngineError::Document(format!("invalid field {item}"));
  match fields {
    Term::Map(pairs) => pairs
      .iter()
      .map(|(name, value)| {
        Ok(FieldSpec {
          name: name.as_str().ok_or_else(|| invalid(name))?,
          value,
          store: true,
          index: true,
        })
      })
      .collect(),
    Term::List(items) => items
      .iter()
      .map(|item| match item.as_tuple() {
        Some([name, value]) => Ok(FieldSpec {
          name: name.as_str().ok_or_else(|| invalid(item))?,
          value,
          store: true,
          index: true,
        }),
        Some([name, value, options]) => Ok(FieldSpec {
          name: name.as_str().ok_or_else(|| invalid(item))?,
          value,
          store: flag(options, "store")?.unwrap_or(true),
          index: flag(options, "index")?.unwrap_or(true),
        }),
        _ => Err(invalid(item)),
      })
      .collect(),
    other => Err(EngineError::Document(format!("fields must be a list or map, got {other}"))),
  }
}

fn flag(options: &Term, name: &str) -> Result<Option<bool>, EngineError> {
  let Some(value) = options.option(name) else {
    return Ok(None);
  };
  match value.as_str() {
    Some("true" | "yes") => Ok(Some(true)),
    Some("false" | "no") => Ok(Some(false)),
    _ => Err(EngineError::Document(format!("invalid {name} option {value}"))),
  }
}

/// Insert `value` under `name`, turning repeated names into arrays.
fn append(map: &mut Map<String, Value>, name: &str, value: Value) {
  match map.get_mut(name) {
    None => {
      map.insert(name.to_string(), value);
    }
    Some(Value::Array(values)) => values.push(value),
    Some(existing) => {
      let first = existing.take();
      *existing = Value::Array(vec![first, value]);
    }
  }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
  match value {
    Value::String(s) => out.push(s.clone()),
    Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
    _ => {}
  }
}

// ============================================================================
// Term <-> JSON
// ============================================================================

pub fn term_to_json(term: &Term) -> Value {
  match term {
    Term::Atom(a) => match a.as_str() {
      "true" => Value::Bool(true),
      "false" => Value::Bool(false),
      "null" | "undefined" => Value::Null,
      other => Value::String(other.to_string()),
    },
    Term::Binary(s) => Value::String(s.clone()),
    Term::Int(n) => Value::Number((*n).into()),
    Term::Float(x) => Number::from_f64(*x).map_or(Value::Null, Value::Number),
    Term::Tuple(items) | Term::List(items) => Value::Array(items.iter().map(term_to_json).collect()),
    Term::Map(pairs) => Value::Object(
      pairs
        .iter()
        .map(|(k, v)| (k.as_str().map_or_else(|| k.to_string(), str::to_string), term_to_json(v)))
        .collect(),
    ),
    Term::Pid(pid) => Value::String(pid.to_string()),
    Term::Ref(_) => Value::String(term.to_string()),
  }
}

pub fn json_to_term(value: &Value) -> Term {
  match value {
    Value::Null => Term::atom("null"),
    Value::Bool(b) => Term::from(*b),
    Value::Number(n) => match n.as_i64() {
      Some(i) => Term::Int(i),
      None => Term::Float(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => Term::binary(s.as_str()),
    Value::Array(items) => Term::List(items.iter().map(json_to_term).collect()),
    Value::Object(map) => Term::Map(
      map
        .iter()
        .map(|(k, v)| (Term::binary(k.as_str()), json_to_term(v)))
        .collect(),
    ),
  }
}
