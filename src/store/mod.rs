//! Durable Key-Value Store
//!
//! Persistence boundary for rotation and usage state. Both documents are
//! whole-document overwrites; callers seeding initial state must supply the
//! exact shapes the owning components serialize.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Entry name for the cooldown document owned by the key store.
pub const ROTATION_ENTRY: &str = "rotation";

/// Entry name for the usage record array owned by the usage recorder.
pub const USAGE_ENTRY: &str = "usage";

/// Minimal durable key-value store.
///
/// Implementations must tolerate concurrent writers; last write wins. The
/// components built on top treat every failure as best-effort: a failed
/// `get` means "no prior state", a failed `put` is logged and dropped.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>>;

    async fn put(&self, name: &str, value: String) -> Result<()>;
}

/// Shared handle to a store implementation.
pub type SharedStore = Arc<dyn KvStore>;
