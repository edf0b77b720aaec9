use std::fmt;

use crate::ipc::{Pid, Term};

/// Why a mailbox closed. Carried by exit signals to every linked peer.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
  Normal,
  Shutdown,
  /// The target of a link or call does not exist.
  NoProc,
  /// The remote side of a socket connection went away.
  NoConnection,
  /// A handler failed; the text is the error rendered for the peer.
  Error(String),
  /// Any other reason supplied by a remote caller.
  Other(Term),
}

impl ExitReason {
  pub fn error(err: impl fmt::Display) -> Self {
    ExitReason::Error(err.to_string())
  }

  pub fn to_term(&self) -> Term {
    match self {
      ExitReason::Normal => Term::atom("normal"),
      ExitReason::Shutdown => Term::atom("shutdown"),
      ExitReason::NoProc => Term::atom("noproc"),
      ExitReason::NoConnection => Term::atom("noconnection"),
      ExitReason::Error(text) => Term::error(Term::binary(text.as_str())),
      ExitReason::Other(term) => term.clone(),
    }
  }

  pub fn from_term(term: Term) -> Self {
    match term.as_atom() {
      Some("normal") => ExitReason::Normal,
      Some("shutdown") => ExitReason::Shutdown,
      Some("noproc") => ExitReason::NoProc,
      Some("noconnection") => ExitReason::NoConnection,
      _ => ExitReason::Other(term),
    }
  }

  /// `{'EXIT', From, Reason}` as seen by a mailbox that traps exits.
  pub fn notice(&self, from: Pid) -> Term {
    Term::tuple([Term::atom("EXIT"), Term::Pid(from), self.to_term()])
  }
}

impl fmt::Display for ExitReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_term())
  }
}
