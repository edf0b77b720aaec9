//! In-process node: mailboxes, names, links and exit signals.
//!
//! The node is the transport every actor talks through. It owns one
//! unbounded channel per mailbox, a registry of well-known names, and the
//! link table that turns the death of one mailbox into an exit signal for
//! every linked peer.
//!
//! # Exit signals
//!
//! ```text
//! close(A, reason)
//!   ├── unregister A's names
//!   └── for each peer linked to A
//!         ├── trapping peer → {'EXIT', A, reason} queued as a message
//!         └── other peer    → reason recorded, peer woken, queue abandoned
//! ```
//!
//! A recorded exit reason takes priority over queued messages: the next
//! receive on that mailbox returns the reason no matter what is queued.

mod exit;
mod mailbox;

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
pub use exit::ExitReason;
pub use mailbox::{CallError, Mailbox};
use mailbox::{Delivery, Shared};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, trace};

use crate::ipc::{Caller, Pid, Term, envelope};

/// Pseudo-address used as the sender of node-initiated signals.
pub const NODE_PID: Pid = Pid::new(0);

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  #[error("Name already registered: {0}")]
  NameTaken(String),
  #[error("No such process: {0}")]
  NoProc(Pid),
  #[error("Failed to spawn actor thread: {0}")]
  Spawn(#[source] std::io::Error),
}

struct Slot {
  tx: mpsc::UnboundedSender<Delivery>,
  shared: Arc<Shared>,
}

// ============================================================================
// Node
// ============================================================================

pub struct Node {
  name: String,
  runtime: Handle,
  next_pid: AtomicU64,
  next_ref: AtomicU64,
  slots: DashMap<Pid, Slot>,
  names: DashMap<String, Pid>,
  links: DashMap<Pid, HashSet<Pid>>,
}

impl Node {
  /// Create a node whose timers and blocking work run on `runtime`.
  pub fn new(name: impl Into<String>, runtime: Handle) -> Arc<Self> {
    Arc::new(Self {
      name: name.into(),
      runtime,
      next_pid: AtomicU64::new(1),
      next_ref: AtomicU64::new(1),
      slots: DashMap::new(),
      names: DashMap::new(),
      links: DashMap::new(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn runtime(&self) -> &Handle {
    &self.runtime
  }

  /// A fresh, node-unique reference term for tagging calls.
  pub fn make_ref(&self) -> Term {
    Term::Ref(self.next_ref.fetch_add(1, Ordering::Relaxed))
  }

  pub fn create_mailbox(self: &Arc<Self>) -> Mailbox {
    let pid = Pid::new(self.next_pid.fetch_add(1, Ordering::Relaxed));
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
      exit: Default::default(),
      trap_exit: AtomicBool::new(false),
    });
    self.slots.insert(
      pid,
      Slot {
        tx,
        shared: Arc::clone(&shared),
      },
    );
    trace!(%pid, "Mailbox created");
    Mailbox::new(pid, Arc::clone(self), rx, shared)
  }

  pub fn is_alive(&self, pid: Pid) -> bool {
    self.slots.contains_key(&pid)
  }

  /// Number of open mailboxes.
  pub fn mailbox_count(&self) -> usize {
    self.slots.len()
  }

  // --------------------------------------------------------------------------
  // Names
  // --------------------------------------------------------------------------

  pub fn register(&self, name: &str, pid: Pid) -> Result<(), NodeError> {
    if !self.is_alive(pid) {
      return Err(NodeError::NoProc(pid));
    }
    match self.names.entry(name.to_string()) {
      Entry::Occupied(_) => Err(NodeError::NameTaken(name.to_string())),
      Entry::Vacant(slot) => {
        slot.insert(pid);
        Ok(())
      }
    }
  }

  pub fn whereis(&self, name: &str) -> Option<Pid> {
    self.names.get(name).map(|pid| *pid)
  }

  // --------------------------------------------------------------------------
  // Messaging
  // --------------------------------------------------------------------------

  /// Queue `msg` for `to`. Messages to a closed mailbox are dropped; the
  /// return value says whether the message was queued.
  pub fn send(&self, to: Pid, msg: Term) -> bool {
    match self.slots.get(&to) {
      Some(slot) => slot.tx.send(Delivery::Message(msg)).is_ok(),
      None => {
        trace!(%to, "Dropping message for closed mailbox");
        false
      }
    }
  }

  pub fn send_named(&self, name: &str, msg: Term) -> bool {
    match self.whereis(name) {
      Some(pid) => self.send(pid, msg),
      None => false,
    }
  }

  /// Answer a call: sends `{Tag, Response}` to the caller.
  pub fn reply(&self, caller: &Caller, response: Term) -> bool {
    self.send(caller.pid, envelope::reply(&caller.tag, response))
  }

  // --------------------------------------------------------------------------
  // Links and exits
  // --------------------------------------------------------------------------

  pub fn link(&self, a: Pid, b: Pid) -> Result<(), NodeError> {
    if a == b {
      return Ok(());
    }
    for pid in [a, b] {
      if !self.is_alive(pid) {
        return Err(NodeError::NoProc(pid));
      }
    }
    self.links.entry(a).or_default().insert(b);
    self.links.entry(b).or_default().insert(a);

    // Either side may have closed before its entry landed in the table.
    for pid in [a, b] {
      if !self.is_alive(pid) {
        self.unlink(a, b);
        return Err(NodeError::NoProc(pid));
      }
    }
    Ok(())
  }

  pub fn unlink(&self, a: Pid, b: Pid) {
    if let Some(mut peers) = self.links.get_mut(&a) {
      peers.remove(&b);
    }
    if let Some(mut peers) = self.links.get_mut(&b) {
      peers.remove(&a);
    }
  }

  /// Peers currently linked to `pid`.
  pub fn links_of(&self, pid: Pid) -> Vec<Pid> {
    self
      .links
      .get(&pid)
      .map(|peers| peers.iter().copied().collect())
      .unwrap_or_default()
  }

  /// Send an exit signal from `from` to `to`.
  pub fn exit(&self, from: Pid, to: Pid, reason: ExitReason) {
    self.signal(from, to, &reason, false);
  }

  fn signal(&self, from: Pid, to: Pid, reason: &ExitReason, force: bool) -> bool {
    let Some(slot) = self.slots.get(&to) else {
      return false;
    };
    if !force && slot.shared.trap_exit.load(Ordering::Acquire) {
      slot.tx.send(Delivery::Message(reason.notice(from))).is_ok()
    } else {
      // First reason wins; later signals only wake the receiver.
      let _ = slot.shared.exit.set(reason.clone());
      slot.tx.send(Delivery::Signal).is_ok()
    }
  }

  /// Remove `pid` from the node and notify its link partners.
  pub(crate) fn close(&self, pid: Pid, reason: &ExitReason) {
    if self.slots.remove(&pid).is_none() {
      return;
    }
    self.names.retain(|_, owner| *owner != pid);

    let peers = self.links.remove(&pid).map(|(_, peers)| peers).unwrap_or_default();
    for peer in peers {
      if let Some(mut back) = self.links.get_mut(&peer) {
        back.remove(&pid);
      }
      self.signal(pid, peer, reason, false);
    }
    debug!(%pid, %reason, "Mailbox closed");
  }

  /// Deliver an untrappable exit signal to every open mailbox.
  pub fn shutdown(&self, reason: ExitReason) {
    let pids: Vec<Pid> = self.slots.iter().map(|entry| *entry.key()).collect();
    debug!(count = pids.len(), %reason, "Shutting down node");
    for pid in pids {
      self.signal(NODE_PID, pid, &reason, true);
    }
  }

  /// Wait until every mailbox has closed. Returns `false` on timeout.
  pub async fn wait_idle(&self, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !self.slots.is_empty() {
      if tokio::time::Instant::now() >= deadline {
        return false;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
  }
}
