//! Generic dispatch loop shared by every actor.

use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::Arc,
  time::Duration,
};

use tracing::{debug, error, trace};

use crate::{
  engine::EngineError,
  ipc::{Caller, Envelope, Pid, Term, envelope},
  node::{ExitReason, Mailbox, Node, NodeError},
};

// ============================================================================
// Error Types
// ============================================================================

/// A handler failure. Any error returned from a handler, or a panic inside
/// one, stops the actor.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
  #[error("Engine error: {0}")]
  Engine(#[from] EngineError),
  #[error("Node error: {0}")]
  Node(#[from] NodeError),
  #[error("{0}")]
  Failed(String),
}

/// What the dispatch loop sends back for a call.
#[derive(Debug)]
pub enum CallReply {
  Reply(Term),
  /// The handler kept the [`Caller`] and answers later via [`Node::reply`].
  NoReply,
  /// The request was not understood; the caller gets `{error, invalid_msg}`.
  Unhandled,
}

// ============================================================================
// Actor trait
// ============================================================================

/// A sequential unit of execution bound to one mailbox.
///
/// Handlers run one at a time on the actor's own thread, so `&mut self`
/// is all the synchronization actor state needs. Every default is a no-op.
pub trait Actor: Send + 'static {
  /// Runs on the dispatch thread before the first message.
  fn init(&mut self, _ctx: &mut Context) -> Result<(), ActorError> {
    Ok(())
  }

  fn handle_call(&mut self, _ctx: &mut Context, _from: &Caller, _request: Term) -> Result<CallReply, ActorError> {
    Ok(CallReply::Unhandled)
  }

  fn handle_cast(&mut self, _ctx: &mut Context, _request: Term) -> Result<(), ActorError> {
    Ok(())
  }

  fn handle_info(&mut self, _ctx: &mut Context, _msg: Term) -> Result<(), ActorError> {
    Ok(())
  }

  /// Runs exactly once, after the last handler, before the mailbox closes.
  fn terminate(&mut self, _ctx: &mut Context, _reason: &ExitReason) {}
}

// ============================================================================
// Context
// ============================================================================

/// Handle an actor uses to reach the node from inside a handler.
pub struct Context {
  pid: Pid,
  node: Arc<Node>,
  stop: Option<ExitReason>,
}

impl Context {
  pub fn self_pid(&self) -> Pid {
    self.pid
  }

  pub fn node(&self) -> &Arc<Node> {
    &self.node
  }

  pub fn link(&self, peer: Pid) -> Result<(), NodeError> {
    self.node.link(self.pid, peer)
  }

  pub fn unlink(&self, peer: Pid) {
    self.node.unlink(self.pid, peer)
  }

  /// Stop after the current handler returns; `terminate` runs before any
  /// further message is looked at.
  pub fn exit(&mut self, reason: ExitReason) {
    if self.stop.is_none() {
      self.stop = Some(reason);
    }
  }

  pub fn reply(&self, caller: &Caller, response: Term) {
    self.node.reply(caller, response);
  }

  /// Post `msg` to this actor every `period` until the actor is gone.
  /// A zero period disables the timer.
  pub fn send_interval(&self, period: Duration, msg: Term) {
    if period.is_zero() {
      return;
    }
    let node = Arc::clone(&self.node);
    let pid = self.pid;
    self.node.runtime().spawn(async move {
      let mut timer = tokio::time::interval(period);
      // Skip the immediate tick
      timer.tick().await;
      loop {
        timer.tick().await;
        if !node.send(pid, msg.clone()) {
          trace!(%pid, "Timer stopped, actor is gone");
          break;
        }
      }
    });
  }
}

// ============================================================================
// Spawning
// ============================================================================

/// Start `actor` on its own OS thread, bound to an existing mailbox.
///
/// Taking the mailbox separately lets callers link it before any message
/// can be dispatched. If the thread cannot be created the actor and its
/// mailbox are dropped, which closes the mailbox.
pub fn start<A: Actor>(actor: A, mailbox: Mailbox) -> Result<Pid, NodeError> {
  let pid = mailbox.pid();
  std::thread::Builder::new()
    .name(format!("actor-{}", pid.id()))
    .spawn(move || run(actor, mailbox))
    .map_err(NodeError::Spawn)?;
  Ok(pid)
}

pub fn spawn<A: Actor>(node: &Arc<Node>, actor: A) -> Result<Pid, NodeError> {
  start(actor, node.create_mailbox())
}

fn run<A: Actor>(mut actor: A, mut mailbox: Mailbox) {
  let mut ctx = Context {
    pid: mailbox.pid(),
    node: Arc::clone(mailbox.node()),
    stop: None,
  };
  debug!(pid = %ctx.pid, "Actor started");

  let reason = match actor.init(&mut ctx) {
    Err(e) => {
      error!(pid = %ctx.pid, error = %e, "Actor init failed");
      ExitReason::error(e)
    }
    Ok(()) => loop {
      if let Some(reason) = ctx.stop.take() {
        break reason;
      }
      let msg = match mailbox.blocking_recv() {
        Ok(msg) => msg,
        Err(reason) => {
          debug!(pid = %ctx.pid, %reason, "Actor received exit signal");
          break reason;
        }
      };
      if let Err(e) = dispatch(&mut actor, &mut ctx, msg) {
        error!(pid = %ctx.pid, error = %e, "Handler failed, stopping actor");
        break ExitReason::error(e);
      }
    },
  };

  actor.terminate(&mut ctx, &reason);
  debug!(pid = %ctx.pid, %reason, "Actor stopped");
  mailbox.close(reason);
}

/// Text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(text) = payload.downcast_ref::<&str>() {
    format!("handler panicked: {text}")
  } else if let Some(text) = payload.downcast_ref::<String>() {
    format!("handler panicked: {text}")
  } else {
    "handler panicked".to_string()
  }
}

fn dispatch<A: Actor>(actor: &mut A, ctx: &mut Context, msg: Term) -> Result<(), ActorError> {
  match Envelope::classify(msg) {
    Envelope::Call { from, request } => {
      let handled = panic::catch_unwind(AssertUnwindSafe(|| actor.handle_call(ctx, &from, request)))
        .unwrap_or_else(|payload| Err(ActorError::Failed(panic_message(payload.as_ref()))));
      match handled {
        Ok(CallReply::Reply(response)) => {
          ctx.reply(&from, response);
          Ok(())
        }
        Ok(CallReply::NoReply) => Ok(()),
        Ok(CallReply::Unhandled) => {
          ctx.reply(&from, envelope::invalid_msg());
          Ok(())
        }
        Err(e) => {
          // The caller still gets an answer before the actor goes down.
          ctx.reply(&from, Term::error(Term::binary(e.to_string())));
          Err(e)
        }
      }
    }
    Envelope::Cast(request) => panic::catch_unwind(AssertUnwindSafe(|| actor.handle_cast(ctx, request)))
      .unwrap_or_else(|payload| Err(ActorError::Failed(panic_message(payload.as_ref())))),
    Envelope::Info(msg) => panic::catch_unwind(AssertUnwindSafe(|| actor.handle_info(ctx, msg)))
      .unwrap_or_else(|payload| Err(ActorError::Failed(panic_message(payload.as_ref())))),
  }
}
