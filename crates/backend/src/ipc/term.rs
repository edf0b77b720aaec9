//! Protocol values exchanged between mailboxes.
//!
//! `Term` mirrors the Erlang external term shapes the index protocol is
//! built on: atoms, binaries, integers, floats, tuples, lists, maps, pids
//! and refs. Requests are matched by shape (`{set_update_seq, 42}`), so the
//! helpers here focus on cheap structural access rather than conversion.
//!
//! On the socket a term is serialized as externally tagged JSON:
//!
//! ```text
//! {"tuple":[{"atom":"ok"},{"int":42}]}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Addresses
// ============================================================================

/// Identifier of one live mailbox on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(u64);

impl Pid {
  pub const fn new(id: u64) -> Self {
    Self(id)
  }

  pub fn id(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for Pid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<0.{}.0>", self.0)
  }
}

// ============================================================================
// Term
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
  Atom(String),
  Binary(String),
  Int(i64),
  Float(f64),
  Tuple(Vec<Term>),
  List(Vec<Term>),
  Map(Vec<(Term, Term)>),
  Pid(Pid),
  Ref(u64),
}

impl Term {
  pub fn atom(name: impl Into<String>) -> Self {
    Term::Atom(name.into())
  }

  pub fn binary(text: impl Into<String>) -> Self {
    Term::Binary(text.into())
  }

  pub fn tuple(items: impl Into<Vec<Term>>) -> Self {
    Term::Tuple(items.into())
  }

  pub fn list(items: impl Into<Vec<Term>>) -> Self {
    Term::List(items.into())
  }

  pub fn ok() -> Self {
    Term::atom("ok")
  }

  /// `{ok, Value}`
  pub fn ok_with(value: Term) -> Self {
    Term::tuple([Term::ok(), value])
  }

  /// `{error, Reason}`
  pub fn error(reason: Term) -> Self {
    Term::tuple([Term::atom("error"), reason])
  }

  /// `{Key, Value}` with an atom key, the building block of proplists.
  pub fn pair(key: &str, value: Term) -> Self {
    Term::tuple([Term::atom(key), value])
  }

  pub fn is_atom(&self, name: &str) -> bool {
    matches!(self, Term::Atom(a) if a == name)
  }

  pub fn as_atom(&self) -> Option<&str> {
    match self {
      Term::Atom(a) => Some(a),
      _ => None,
    }
  }

  /// Text content of an atom or a binary.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Term::Atom(s) | Term::Binary(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Term::Int(n) => Some(*n),
      _ => None,
    }
  }

  /// Booleans are the atoms `true` and `false`.
  pub fn as_bool(&self) -> Option<bool> {
    match self.as_atom()? {
      "true" => Some(true),
      "false" => Some(false),
      _ => None,
    }
  }

  pub fn as_pid(&self) -> Option<Pid> {
    match self {
      Term::Pid(pid) => Some(*pid),
      _ => None,
    }
  }

  pub fn as_tuple(&self) -> Option<&[Term]> {
    match self {
      Term::Tuple(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Term]> {
    match self {
      Term::List(items) => Some(items),
      _ => None,
    }
  }

  /// Split a `{Command, Args...}` tuple into its atom head and arguments.
  pub fn as_command(&self) -> Option<(&str, &[Term])> {
    let (head, args) = self.as_tuple()?.split_first()?;
    Some((head.as_atom()?, args))
  }

  /// Key/value entries of a map or a proplist (`[{Key, Value}]`).
  /// Returns `None` for any other shape.
  pub fn entries(&self) -> Option<Vec<(&Term, &Term)>> {
    match self {
      Term::Map(pairs) => Some(pairs.iter().map(|(k, v)| (k, v)).collect()),
      Term::List(items) => {
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
          match item {
            Term::Tuple(kv) if kv.len() == 2 => entries.push((&kv[0], &kv[1])),
            _ => return None,
          }
        }
        Some(entries)
      }
      _ => None,
    }
  }

  /// Look up an option by name in a map or proplist. Atom and binary keys
  /// match alike.
  pub fn option(&self, name: &str) -> Option<&Term> {
    self.entries()?.into_iter().find(|(k, _)| k.as_str() == Some(name)).map(|(_, v)| v)
  }
}

impl From<&str> for Term {
  fn from(value: &str) -> Self {
    Term::binary(value)
  }
}

impl From<String> for Term {
  fn from(value: String) -> Self {
    Term::Binary(value)
  }
}

impl From<i64> for Term {
  fn from(value: i64) -> Self {
    Term::Int(value)
  }
}

impl From<bool> for Term {
  fn from(value: bool) -> Self {
    Term::atom(if value { "true" } else { "false" })
  }
}

impl From<Pid> for Term {
  fn from(value: Pid) -> Self {
    Term::Pid(value)
  }
}

// ============================================================================
// Display
// ============================================================================

fn is_bare_atom(name: &str) -> bool {
  let mut chars = name.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '@')
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
  for (i, item) in items.iter().enumerate() {
    if i > 0 {
      f.write_str(",")?;
    }
    write!(f, "{item}")?;
  }
  Ok(())
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Term::Atom(a) if is_bare_atom(a) => f.write_str(a),
      Term::Atom(a) => write!(f, "'{a}'"),
      Term::Binary(b) => write!(f, "<<{b:?}>>"),
      Term::Int(n) => write!(f, "{n}"),
      Term::Float(x) => write!(f, "{x:?}"),
      Term::Tuple(items) => {
        f.write_str("{")?;
        write_seq(f, items)?;
        f.write_str("}")
      }
      Term::List(items) => {
        f.write_str("[")?;
        write_seq(f, items)?;
        f.write_str("]")
      }
      Term::Map(pairs) => {
        f.write_str("#{")?;
        for (i, (k, v)) in pairs.iter().enumerate() {
          if i > 0 {
            f.write_str(",")?;
          }
          write!(f, "{k} => {v}")?;
        }
        f.write_str("}")
      }
      Term::Pid(pid) => write!(f, "{pid}"),
      Term::Ref(r) => write!(f, "#Ref<{r}>"),
    }
  }
}
