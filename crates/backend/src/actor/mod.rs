//! Actors served by the node.
//!
//! Every actor owns one mailbox and runs its dispatch loop on its own named
//! OS thread, outside the tokio blocking pool. Handlers for the same actor
//! never overlap, so actor state is plain owned data with no locks.
//!
//! # Architecture
//!
//! ```text
//! socket peer ──open──▶ IndexManager ("main")
//!                          │ spawn_blocking: analyzer, lock, directory, writer
//!                          ▼
//!                       IndexActor ◀──link──▶ peer
//!                          ├── update / delete / search   (calls)
//!                          ├── set_update_seq / set_purge_seq
//!                          └── commit timer ──cast──▶ itself
//! ```
//!
//! # Actors
//!
//! - [`IndexManager`]: registered singleton that opens indexes
//! - [`IndexActor`]: one per open index; owns the writer and the read view
//!
//! The generic dispatch loop lives in [`runtime`].

pub mod index;
pub mod manager;
pub mod runtime;

#[cfg(test)]
mod __tests__;

use std::sync::Arc;

pub use index::{IndexActor, IndexActorBuilder, IndexError};
pub use manager::{IndexManager, MANAGER_NAME, OpenError};

use crate::{config::Config, engine::StorageRegistry, node::Node};

/// Process-wide state every actor shares.
pub struct ServerState {
  pub config: Config,
  pub node: Arc<Node>,
  pub storage: StorageRegistry,
}

impl ServerState {
  pub fn new(config: Config, node: Arc<Node>) -> Arc<Self> {
    Arc::new(Self {
      config,
      node,
      storage: StorageRegistry::default(),
    })
  }
}
