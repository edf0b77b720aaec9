use std::{
  collections::VecDeque,
  sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use tokio::sync::mpsc;

use super::{ExitReason, Node};
use crate::ipc::{Pid, Term, envelope};

pub(super) enum Delivery {
  Message(Term),
  /// Wake-up for a recorded exit reason.
  Signal,
}

pub(super) struct Shared {
  pub(super) exit: OnceLock<ExitReason>,
  pub(super) trap_exit: AtomicBool,
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
  #[error("No such process: {0}")]
  NoProc(String),
  #[error("Call timed out")]
  Timeout,
  #[error("Caller exited: {0}")]
  Exited(ExitReason),
}

/// Receiving end of one address on a node.
///
/// Dropping a mailbox closes it: its names are released and linked peers
/// receive an exit signal (`normal` unless the mailbox was killed first).
pub struct Mailbox {
  pid: Pid,
  node: Arc<Node>,
  rx: mpsc::UnboundedReceiver<Delivery>,
  shared: Arc<Shared>,
  /// Messages set aside while waiting for a call reply.
  stash: VecDeque<Term>,
  closed: bool,
}

impl Mailbox {
  pub(super) fn new(pid: Pid, node: Arc<Node>, rx: mpsc::UnboundedReceiver<Delivery>, shared: Arc<Shared>) -> Self {
    Self {
      pid,
      node,
      rx,
      shared,
      stash: VecDeque::new(),
      closed: false,
    }
  }

  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn node(&self) -> &Arc<Node> {
    &self.node
  }

  /// When trapping, exit signals from linked peers arrive as
  /// `{'EXIT', From, Reason}` messages instead of killing the mailbox.
  pub fn trap_exits(&self, on: bool) {
    self.shared.trap_exit.store(on, Ordering::Release);
  }

  pub fn exit_reason(&self) -> Option<&ExitReason> {
    self.shared.exit.get()
  }

  /// Next message, or the exit reason once one has been recorded.
  pub async fn recv(&mut self) -> Result<Term, ExitReason> {
    loop {
      if let Some(reason) = self.shared.exit.get() {
        return Err(reason.clone());
      }
      if let Some(term) = self.stash.pop_front() {
        return Ok(term);
      }
      match self.rx.recv().await {
        Some(Delivery::Message(term)) => self.stash.push_back(term),
        Some(Delivery::Signal) => {}
        None => return Err(ExitReason::NoProc),
      }
    }
  }

  /// Blocking variant of [`Mailbox::recv`] for dispatch threads.
  pub(crate) fn blocking_recv(&mut self) -> Result<Term, ExitReason> {
    loop {
      if let Some(reason) = self.shared.exit.get() {
        return Err(reason.clone());
      }
      if let Some(term) = self.stash.pop_front() {
        return Ok(term);
      }
      match self.rx.blocking_recv() {
        Some(Delivery::Message(term)) => self.stash.push_back(term),
        Some(Delivery::Signal) => {}
        None => return Err(ExitReason::NoProc),
      }
    }
  }

  pub fn send(&self, to: Pid, msg: Term) -> bool {
    self.node.send(to, msg)
  }

  /// Send `{'$gen_cast', Request}`.
  pub fn cast(&self, to: Pid, request: Term) -> bool {
    self.node.send(to, envelope::cast(request))
  }

  /// Synchronous call: sends `{'$gen_call', {Self, Tag}, Request}` and waits
  /// for `{Tag, Response}`. Other messages that arrive meanwhile stay queued
  /// for the next [`Mailbox::recv`].
  pub async fn call(&mut self, to: Pid, request: Term, timeout: Duration) -> Result<Term, CallError> {
    if !self.node.is_alive(to) {
      return Err(CallError::NoProc(to.to_string()));
    }
    let tag = self.node.make_ref();
    self.node.send(to, envelope::call(self.pid, tag.clone(), request));

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      if let Some(reason) = self.shared.exit.get() {
        return Err(CallError::Exited(reason.clone()));
      }
      let delivery = tokio::time::timeout_at(deadline, self.rx.recv())
        .await
        .map_err(|_| CallError::Timeout)?;
      match delivery {
        Some(Delivery::Message(term)) => match envelope::match_reply(term, &tag) {
          Ok(response) => return Ok(response),
          Err(other) => self.stash.push_back(other),
        },
        Some(Delivery::Signal) => {}
        None => return Err(CallError::Exited(ExitReason::NoProc)),
      }
    }
  }

  /// Call a process by registered name.
  pub async fn call_named(&mut self, name: &str, request: Term, timeout: Duration) -> Result<Term, CallError> {
    let to = self
      .node
      .whereis(name)
      .ok_or_else(|| CallError::NoProc(name.to_string()))?;
    self.call(to, request, timeout).await
  }

  pub fn close(mut self, reason: ExitReason) {
    self.closed = true;
    self.node.close(self.pid, &reason);
  }
}

impl Drop for Mailbox {
  fn drop(&mut self) {
    if !self.closed {
      let reason = self.shared.exit.get().cloned().unwrap_or(ExitReason::Normal);
      self.node.close(self.pid, &reason);
    }
  }
}
