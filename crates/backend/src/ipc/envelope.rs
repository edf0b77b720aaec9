//! gen_server envelope shapes.
//!
//! ```text
//! call:  {'$gen_call', {ReplyPid, Tag}, Request}  → {Tag, Response}
//! cast:  {'$gen_cast', Request}
//! info:  anything else
//! ```

use super::{Pid, Term};

const GEN_CALL: &str = "$gen_call";
const GEN_CAST: &str = "$gen_cast";

/// Return address of a call: who to answer and the tag to answer with.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
  pub pid: Pid,
  pub tag: Term,
}

#[derive(Debug, PartialEq)]
pub enum Envelope {
  Call { from: Caller, request: Term },
  Cast(Term),
  Info(Term),
}

impl Envelope {
  /// Classify a mailbox message by shape. Malformed call or cast tuples
  /// are treated as info.
  pub fn classify(msg: Term) -> Self {
    let Term::Tuple(mut items) = msg else {
      return Envelope::Info(msg);
    };
    match (items.first().and_then(Term::as_atom), items.len()) {
      (Some(GEN_CALL), 3) => {
        let from = items[1].as_tuple().and_then(|from| match from {
          [pid, tag] => Some(Caller {
            pid: pid.as_pid()?,
            tag: tag.clone(),
          }),
          _ => None,
        });
        match from {
          Some(from) => {
            let request = items.pop().unwrap_or(Term::List(Vec::new()));
            Envelope::Call { from, request }
          }
          None => Envelope::Info(Term::Tuple(items)),
        }
      }
      (Some(GEN_CAST), 2) => Envelope::Cast(items.pop().unwrap_or(Term::List(Vec::new()))),
      _ => Envelope::Info(Term::Tuple(items)),
    }
  }
}

pub fn call(from: Pid, tag: Term, request: Term) -> Term {
  Term::tuple([Term::atom(GEN_CALL), Term::tuple([Term::Pid(from), tag]), request])
}

pub fn cast(request: Term) -> Term {
  Term::tuple([Term::atom(GEN_CAST), request])
}

pub fn reply(tag: &Term, response: Term) -> Term {
  Term::tuple([tag.clone(), response])
}

/// Extract the response from `{Tag, Response}` if `msg` answers `tag`;
/// otherwise hand the message back untouched.
pub fn match_reply(msg: Term, tag: &Term) -> Result<Term, Term> {
  match msg {
    Term::Tuple(mut items) if items.len() == 2 && &items[0] == tag => Ok(items.pop().unwrap_or(Term::List(Vec::new()))),
    other => Err(other),
  }
}

/// The generic answer to a call nobody understood.
pub fn invalid_msg() -> Term {
  Term::error(Term::atom("invalid_msg"))
}
