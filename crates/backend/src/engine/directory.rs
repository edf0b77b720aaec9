//! Storage and lock selection by configured identifier.
//!
//! Both tables are filled once at startup; `open` looks implementations up
//! by the ids in `[index] directory` and `[index] lock_factory`.

use std::{
  collections::BTreeMap,
  fs::{File, OpenOptions},
  path::{Path, PathBuf},
  sync::Arc,
};

use dashmap::DashSet;
use fs2::FileExt;
use tantivy::directory::{Directory, MmapDirectory, RamDirectory};
use tracing::{debug, trace};

use super::EngineError;

/// Name of the lock file the `native` factory holds inside an index directory.
pub const WRITE_LOCK: &str = "write.lock";

pub type DirectoryFactory = fn(&Path) -> Result<Box<dyn Directory>, EngineError>;

/// Grants exclusive write access to one index directory.
pub trait LockFactory: Send + Sync {
  fn obtain(&self, dir: &Path) -> Result<Box<dyn IndexLock>, EngineError>;
}

/// A held write lock. Dropping it also releases the lock.
pub trait IndexLock: Send {
  fn release(self: Box<Self>) -> Result<(), EngineError>;
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Clone)]
pub struct StorageRegistry {
  directories: BTreeMap<&'static str, DirectoryFactory>,
  locks: BTreeMap<&'static str, Arc<dyn LockFactory>>,
}

impl Default for StorageRegistry {
  fn default() -> Self {
    let mut registry = Self {
      directories: BTreeMap::new(),
      locks: BTreeMap::new(),
    };
    registry.register_directory("mmap", open_mmap);
    registry.register_directory("ram", open_ram);
    registry.register_lock_factory("native", Arc::new(NativeLockFactory));
    registry.register_lock_factory("single_instance", Arc::new(SingleInstanceLockFactory::default()));
    registry.register_lock_factory("none", Arc::new(NoLockFactory));
    registry
  }
}

impl StorageRegistry {
  pub fn register_directory(&mut self, id: &'static str, factory: DirectoryFactory) {
    self.directories.insert(id, factory);
  }

  pub fn register_lock_factory(&mut self, id: &'static str, factory: Arc<dyn LockFactory>) {
    self.locks.insert(id, factory);
  }

  pub fn open_directory(&self, id: &str, path: &Path) -> Result<Box<dyn Directory>, EngineError> {
    let factory = self
      .directories
      .get(id)
      .ok_or_else(|| EngineError::UnknownDirectory(id.to_string()))?;
    debug!(directory = id, path = %path.display(), "Opening index directory");
    factory(path)
  }

  pub fn lock_factory(&self, id: &str) -> Result<Arc<dyn LockFactory>, EngineError> {
    self
      .locks
      .get(id)
      .cloned()
      .ok_or_else(|| EngineError::UnknownLockFactory(id.to_string()))
  }

  pub fn directory_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.directories.keys().copied()
  }

  pub fn lock_factory_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.locks.keys().copied()
  }
}

fn open_mmap(path: &Path) -> Result<Box<dyn Directory>, EngineError> {
  std::fs::create_dir_all(path)?;
  Ok(Box::new(MmapDirectory::open(path)?))
}

fn open_ram(_path: &Path) -> Result<Box<dyn Directory>, EngineError> {
  Ok(Box::new(RamDirectory::create()))
}

// ============================================================================
// Lock factories
// ============================================================================

/// OS advisory lock on `write.lock`, visible to other processes.
pub struct NativeLockFactory;

struct NativeLock {
  file: File,
  path: PathBuf,
}

impl LockFactory for NativeLockFactory {
  fn obtain(&self, dir: &Path) -> Result<Box<dyn IndexLock>, EngineError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(WRITE_LOCK);
    let file = OpenOptions::new().create(true).truncate(false).write(true).open(&path)?;
    file
      .try_lock_exclusive()
      .map_err(|e| EngineError::LockObtainFailed(format!("{}: {e}", path.display())))?;
    trace!(path = %path.display(), "Native lock obtained");
    Ok(Box::new(NativeLock { file, path }))
  }
}

impl IndexLock for NativeLock {
  fn release(self: Box<Self>) -> Result<(), EngineError> {
    trace!(path = %self.path.display(), "Native lock released");
    FileExt::unlock(&self.file)?;
    Ok(())
  }
}

/// Process-local lock: a set of directories currently held by this node.
#[derive(Default)]
pub struct SingleInstanceLockFactory {
  held: Arc<DashSet<PathBuf>>,
}

struct SingleInstanceLock {
  held: Arc<DashSet<PathBuf>>,
  path: PathBuf,
}

impl LockFactory for SingleInstanceLockFactory {
  fn obtain(&self, dir: &Path) -> Result<Box<dyn IndexLock>, EngineError> {
    let path = dir.to_path_buf();
    if !self.held.insert(path.clone()) {
      return Err(EngineError::LockObtainFailed(format!("{} is held by this node", path.display())));
    }
    Ok(Box::new(SingleInstanceLock {
      held: Arc::clone(&self.held),
      path,
    }))
  }
}

impl IndexLock for SingleInstanceLock {
  fn release(self: Box<Self>) -> Result<(), EngineError> {
    Ok(())
  }
}

impl Drop for SingleInstanceLock {
  fn drop(&mut self) {
    self.held.remove(&self.path);
  }
}

/// No locking at all; the caller guarantees a single writer.
pub struct NoLockFactory;

struct NoLock;

impl LockFactory for NoLockFactory {
  fn obtain(&self, _dir: &Path) -> Result<Box<dyn IndexLock>, EngineError> {
    Ok(Box::new(NoLock))
  }
}

impl IndexLock for NoLock {
  fn release(self: Box<Self>) -> Result<(), EngineError> {
    Ok(())
  }
}

// ============================================================================
// Disk usage
// ============================================================================

/// Total size in bytes of every file below `path`. Unreadable entries count as 0.
pub fn disk_size(path: &Path) -> u64 {
  let Ok(entries) = std::fs::read_dir(path) else {
    return 0;
  };
  entries
    .flatten()
    .map(|entry| match entry.metadata() {
      Ok(meta) if meta.is_dir() => disk_size(&entry.path()),
      Ok(meta) => meta.len(),
      Err(_) => 0,
    })
    .sum()
}
