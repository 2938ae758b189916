//! In-memory store.
//!
//! Used when no state path is configured; state then lives only as long as
//! the process. Also the default fixture in tests.

use crate::error::Result;
use crate::store::KvStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(name).cloned())
    }

    async fn put(&self, name: &str, value: String) -> Result<()> {
        self.entries.write().insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_get() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            assert!(store.get("rotation").await.unwrap().is_none());

            store.put("rotation", "{}".to_string()).await.unwrap();
            assert_eq!(store.get("rotation").await.unwrap().as_deref(), Some("{}"));
        });
    }
}
