//! Usage Recorder
//!
//! Append-only log of per-call token usage, pruned by a retention window
//! and aggregable by credential and by model. Persistence mirrors the key
//! store: best-effort load on construction, fire-and-forget writes.

use crate::store::{SharedStore, USAGE_ENTRY};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default retention window: seven days
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Group label for records without a credential
const ANONYMOUS_KEY: &str = "anonymous";

/// One persisted usage entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    #[serde(rename = "credential", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Input to `record`; the timestamp is stamped when omitted
#[derive(Debug, Clone, Default)]
pub struct UsageEvent {
    pub key: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: Option<i64>,
}

/// Aggregate over one credential
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    pub key: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub last_used: i64,
}

/// Aggregate over one model
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub struct UsageRecorder {
    records: RwLock<Vec<UsageRecord>>,
    store: SharedStore,
    retention: Duration,
}

impl UsageRecorder {
    pub async fn load(store: SharedStore) -> Self {
        Self::load_with(store, DEFAULT_RETENTION).await
    }

    /// Load the persisted array, tolerating a missing or corrupt blob, and
    /// prune immediately.
    pub async fn load_with(store: SharedStore, retention: Duration) -> Self {
        let mut records = match store.get(USAGE_ENTRY).await {
            Ok(Some(text)) => match serde_json::from_str::<Vec<UsageRecord>>(&text) {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!("discarding corrupt usage log: {}", err);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("usage log unavailable, starting empty: {}", err);
                Vec::new()
            }
        };
        prune(&mut records, cutoff_ms(retention));

        Self {
            records: RwLock::new(records),
            store,
            retention,
        }
    }

    /// Append one record, prune expired entries, persist the pruned array.
    pub fn record(&self, event: UsageEvent) {
        let record = UsageRecord {
            key: event.key,
            model: event.model,
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            timestamp: event.timestamp.unwrap_or_else(now_ms),
        };
        {
            let mut records = self.records.write();
            records.push(record);
            prune(&mut records, cutoff_ms(self.retention));
        }
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Per-credential aggregates, sorted descending by call count.
    pub fn key_summaries(&self) -> Vec<KeySummary> {
        let records = self.records.read();
        let mut groups: HashMap<&str, KeySummary> = HashMap::new();

        for record in records.iter() {
            let key = record.key.as_deref().unwrap_or(ANONYMOUS_KEY);
            let entry = groups.entry(key).or_insert_with(|| KeySummary {
                key: key.to_string(),
                calls: 0,
                input_tokens: 0,
                output_tokens: 0,
                last_used: 0,
            });
            entry.calls += 1;
            entry.input_tokens += record.input_tokens;
            entry.output_tokens += record.output_tokens;
            entry.last_used = entry.last_used.max(record.timestamp);
        }

        let mut summaries: Vec<KeySummary> = groups.into_values().collect();
        summaries.sort_by(|a, b| b.calls.cmp(&a.calls));
        summaries
    }

    /// Per-model aggregates, sorted descending by call count.
    pub fn model_totals(&self) -> Vec<ModelSummary> {
        let records = self.records.read();
        let mut groups: HashMap<&str, ModelSummary> = HashMap::new();

        for record in records.iter() {
            let entry = groups
                .entry(record.model.as_str())
                .or_insert_with(|| ModelSummary {
                    model: record.model.clone(),
                    calls: 0,
                    input_tokens: 0,
                    output_tokens: 0,
                });
            entry.calls += 1;
            entry.input_tokens += record.input_tokens;
            entry.output_tokens += record.output_tokens;
        }

        let mut totals: Vec<ModelSummary> = groups.into_values().collect();
        totals.sort_by(|a, b| b.calls.cmp(&a.calls));
        totals
    }

    fn persist(&self) {
        let records = self.records.read().clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let text = match serde_json::to_string(&records) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("usage log serialization failed: {}", err);
                    return;
                }
            };
            if let Err(err) = store.put(USAGE_ENTRY, text).await {
                tracing::warn!("usage log write failed: {}", err);
            }
        });
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn cutoff_ms(retention: Duration) -> i64 {
    now_ms() - retention.as_millis() as i64
}

fn prune(records: &mut Vec<UsageRecord>, cutoff: i64) {
    records.retain(|record| record.timestamp >= cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvStore, MemoryStore};
    use std::sync::Arc;

    fn event(key: Option<&str>, model: &str, timestamp: Option<i64>) -> UsageEvent {
        UsageEvent {
            key: key.map(|k| k.to_string()),
            model: model.to_string(),
            input_tokens: 10,
            output_tokens: 20,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_record_and_aggregate() {
        let recorder = UsageRecorder::load(Arc::new(MemoryStore::new())).await;
        recorder.record(event(Some("k1"), "gemini-2.5-pro", None));
        recorder.record(event(Some("k1"), "gemini-2.5-flash", None));
        recorder.record(event(Some("k2"), "gemini-2.5-pro", None));
        recorder.record(event(None, "gemini-2.5-pro", None));

        let keys = recorder.key_summaries();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].key, "k1");
        assert_eq!(keys[0].calls, 2);
        assert_eq!(keys[0].input_tokens, 20);
        assert!(keys.iter().any(|s| s.key == "anonymous"));

        let models = recorder.model_totals();
        assert_eq!(models[0].model, "gemini-2.5-pro");
        assert_eq!(models[0].calls, 3);
        assert_eq!(models[0].output_tokens, 60);
    }

    #[tokio::test]
    async fn test_expired_records_pruned_on_record() {
        let recorder =
            UsageRecorder::load_with(Arc::new(MemoryStore::new()), Duration::from_secs(60)).await;

        recorder.record(event(Some("old"), "gemini-2.5-pro", Some(now_ms() - 120_000)));
        assert_eq!(recorder.len(), 0, "expired on arrival");

        recorder.record(event(Some("k1"), "gemini-2.5-pro", None));
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_records_pruned_on_load() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let records = vec![
            UsageRecord {
                key: Some("stale".into()),
                model: "gemini-2.5-pro".into(),
                input_tokens: 1,
                output_tokens: 1,
                timestamp: now_ms() - 10 * 24 * 3600 * 1000,
            },
            UsageRecord {
                key: Some("fresh".into()),
                model: "gemini-2.5-pro".into(),
                input_tokens: 1,
                output_tokens: 1,
                timestamp: now_ms(),
            },
        ];
        store
            .put(USAGE_ENTRY, serde_json::to_string(&records).unwrap())
            .await
            .unwrap();

        let recorder = UsageRecorder::load(store).await;
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.key_summaries()[0].key, "fresh");
    }

    #[tokio::test]
    async fn test_corrupt_log_loads_empty() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        store.put(USAGE_ENTRY, "{{{".to_string()).await.unwrap();

        let recorder = UsageRecorder::load(store).await;
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_persists_pruned_array() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::load(store.clone()).await;
        recorder.record(event(Some("k1"), "gemini-2.5-flash", None));

        tokio::time::sleep(Duration::from_millis(20)).await;

        let persisted = store.get(USAGE_ENTRY).await.unwrap().unwrap();
        assert!(persisted.contains("\"credential\":\"k1\""));
        assert!(persisted.contains("\"inputTokens\""));

        let parsed: Vec<UsageRecord> = serde_json::from_str(&persisted).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key.as_deref(), Some("k1"));
    }
}
