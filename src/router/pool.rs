//! Credential Pool
//!
//! Fixed-order round robin over structured credential objects, for callers
//! that hold long-lived clients rather than raw key strings. Invalidated
//! entries recover by time alone: once the cooldown window has elapsed, the
//! next access re-enables them.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Default invalidation window
pub const DEFAULT_POOL_COOLDOWN: Duration = Duration::from_secs(3600);

/// Default consecutive-error threshold before invalidation
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// A pooled credential with its invalidation state
#[derive(Debug)]
pub struct PoolEntry<C> {
    client: C,
    error_count: AtomicU32,
    invalidated_at: RwLock<Option<Instant>>,
}

impl<C> PoolEntry<C> {
    fn new(client: C) -> Self {
        Self {
            client,
            error_count: AtomicU32::new(0),
            invalidated_at: RwLock::new(None),
        }
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.read().is_some()
    }
}

/// Observability view over one pool slot
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolEntryStatus {
    pub index: usize,
    pub error_count: u32,
    pub invalidated: bool,
}

/// Round-robin pool of structured credentials
pub struct CredentialPool<C> {
    entries: Vec<PoolEntry<C>>,
    cursor: AtomicUsize,
    cooldown: Duration,
    error_threshold: u32,
}

impl<C> CredentialPool<C> {
    pub fn new(clients: Vec<C>, cooldown: Duration, error_threshold: u32) -> Self {
        Self {
            entries: clients.into_iter().map(PoolEntry::new).collect(),
            cursor: AtomicUsize::new(0),
            cooldown,
            error_threshold: error_threshold.max(1),
        }
    }

    pub fn with_defaults(clients: Vec<C>) -> Self {
        Self::new(clients, DEFAULT_POOL_COOLDOWN, DEFAULT_ERROR_THRESHOLD)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current cursor position (next scan start), for observability.
    pub fn position(&self) -> usize {
        match self.entries.len() {
            0 => 0,
            len => self.cursor.load(Ordering::Relaxed) % len,
        }
    }

    /// Next acceptable credential.
    ///
    /// The cursor advances by exactly one position per call regardless of
    /// outcome, so selection stays fair under repeated calls; the scan
    /// itself probes at most `len` candidates from the old cursor position.
    pub fn next(&self) -> Result<(usize, &C)> {
        let len = self.entries.len();
        if len == 0 {
            return Err(Error::PoolExhausted);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let index = (start + offset) % len;
            let entry = &self.entries[index];

            let mut invalidated_at = entry.invalidated_at.write();
            match *invalidated_at {
                None => return Ok((index, &entry.client)),
                Some(at) if at.elapsed() > self.cooldown => {
                    *invalidated_at = None;
                    entry.error_count.store(0, Ordering::Relaxed);
                    tracing::info!(index, "pool credential re-enabled after cooldown");
                    return Ok((index, &entry.client));
                }
                Some(_) => continue,
            }
        }

        Err(Error::PoolExhausted)
    }

    /// Invalidate one slot. Idempotent: a second call while the entry is
    /// already invalidated keeps the original invalidation instant.
    pub fn mark_invalid(&self, index: usize) {
        let Some(entry) = self.entries.get(index) else {
            return;
        };
        let mut invalidated_at = entry.invalidated_at.write();
        if invalidated_at.is_none() {
            *invalidated_at = Some(Instant::now());
            tracing::warn!(index, "pool credential invalidated");
        }
    }

    /// Report one failed call against a slot. Crossing the configured
    /// threshold invalidates the entry; counts reset only on re-enable.
    pub fn record_error(&self, index: usize) {
        let Some(entry) = self.entries.get(index) else {
            return;
        };
        let count = entry.error_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.error_threshold {
            self.mark_invalid(index);
        }
    }

    pub fn snapshot(&self) -> Vec<PoolEntryStatus> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| PoolEntryStatus {
                index,
                error_count: entry.error_count(),
                invalidated: entry.is_invalidated(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(n: usize) -> CredentialPool<String> {
        CredentialPool::with_defaults((0..n).map(|i| format!("client-{}", i)).collect())
    }

    #[test]
    fn test_round_robin_order() {
        let pool = pool_of(3);
        assert_eq!(pool.next().unwrap().0, 0);
        assert_eq!(pool.next().unwrap().0, 1);
        assert_eq!(pool.next().unwrap().0, 2);
        assert_eq!(pool.next().unwrap().0, 0);
    }

    #[test]
    fn test_cursor_advances_one_per_call_regardless_of_outcome() {
        let pool = pool_of(4);
        pool.mark_invalid(1);
        pool.mark_invalid(2);

        for expected in 1..=8usize {
            let _ = pool.next();
            assert_eq!(pool.cursor.load(Ordering::Relaxed), expected);
        }
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let pool = pool_of(3);
        pool.mark_invalid(0);

        // Scan starts at the old cursor but skips past the invalid slot.
        assert_eq!(pool.next().unwrap().0, 1);
        assert_eq!(pool.next().unwrap().0, 1);
        assert_eq!(pool.next().unwrap().0, 2);
    }

    #[test]
    fn test_all_invalid_exhausts_pool() {
        let pool = pool_of(2);
        pool.mark_invalid(0);
        pool.mark_invalid(1);
        assert!(matches!(pool.next(), Err(Error::PoolExhausted)));
    }

    #[test]
    fn test_empty_pool_exhausts() {
        let pool: CredentialPool<String> = CredentialPool::with_defaults(vec![]);
        assert!(matches!(pool.next(), Err(Error::PoolExhausted)));
    }

    #[test]
    fn test_timed_recovery_clears_invalidation_and_errors() {
        let pool = CredentialPool::new(vec!["only".to_string()], Duration::from_millis(5), 2);
        pool.record_error(0);
        pool.record_error(0);
        assert!(pool.entries[0].is_invalidated());
        assert!(pool.next().is_err());

        std::thread::sleep(Duration::from_millis(10));

        let (index, client) = pool.next().unwrap();
        assert_eq!(index, 0);
        assert_eq!(client, "only");
        assert!(!pool.entries[0].is_invalidated());
        assert_eq!(pool.entries[0].error_count(), 0);
    }

    #[test]
    fn test_error_threshold_invalidates() {
        let pool = CredentialPool::new(vec!["a".to_string(), "b".to_string()], DEFAULT_POOL_COOLDOWN, 3);
        pool.record_error(0);
        pool.record_error(0);
        assert!(!pool.entries[0].is_invalidated());
        pool.record_error(0);
        assert!(pool.entries[0].is_invalidated());
    }

    #[test]
    fn test_mark_invalid_is_idempotent() {
        let pool = pool_of(1);
        pool.mark_invalid(0);
        let first = *pool.entries[0].invalidated_at.read();
        pool.mark_invalid(0);
        assert_eq!(*pool.entries[0].invalidated_at.read(), first);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let pool = pool_of(1);
        pool.mark_invalid(7);
        pool.record_error(7);
        assert!(pool.next().is_ok());
    }
}
