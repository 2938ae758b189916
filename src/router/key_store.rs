//! API Key Store
//!
//! Holds the working set of raw credentials with per-key cooldown state,
//! answers availability queries, and mirrors every mutation to the durable
//! store. Random selection spreads load across concurrent instances that
//! cannot coordinate.

use crate::error::{Error, Result};
use crate::store::{SharedStore, ROTATION_ENTRY};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default cooldown applied by `mark_exhausted` when no override is given.
pub const DEFAULT_COOLDOWN_SECS: u64 = 3600;

/// Injectable randomness: given an exclusive upper bound, returns an index
/// below it. Tests supply a deterministic closure.
pub type Selector = Box<dyn Fn(usize) -> usize + Send + Sync>;

/// Pseudo-random selector built on the stdlib hasher.
pub fn default_selector() -> Selector {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    Box::new(|bound| {
        let hasher = RandomState::new().build_hasher();
        (hasher.finish() as usize) % bound.max(1)
    })
}

/// Cooldown annotation for a single key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    /// Epoch milliseconds until which the key is excluded from selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhausted_until: Option<i64>,

    /// Model the key was last exhausted on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exhausted_model: Option<String>,
}

impl KeyStatus {
    fn is_cooling(&self, now_ms: i64) -> bool {
        match self.exhausted_until {
            Some(until) => until > now_ms,
            None => false,
        }
    }
}

/// Persisted shape of the key set and cooldown map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationDocument {
    #[serde(default)]
    pub keys: Vec<String>,

    #[serde(default)]
    pub key_status: HashMap<String, KeyStatus>,

    #[serde(default)]
    pub saved_at: i64,
}

/// Masked per-key view for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub key: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhausted_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exhausted_model: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    keys: Vec<String>,
    status: HashMap<String, KeyStatus>,
}

impl State {
    fn from_document(doc: RotationDocument) -> Self {
        let keys = dedup_keys(doc.keys);
        let mut status = doc.key_status;
        status.retain(|key, _| keys.contains(key));
        Self { keys, status }
    }
}

/// Store of raw API keys with persisted cooldown state
pub struct KeyStore {
    state: RwLock<State>,
    store: SharedStore,
    default_cooldown_secs: u64,
    selector: Selector,
}

impl KeyStore {
    /// Load prior state from the durable store. Any load failure is treated
    /// as "no prior state" so a persistence outage never blocks cold start.
    pub async fn load(store: SharedStore) -> Self {
        Self::load_with(store, DEFAULT_COOLDOWN_SECS, default_selector()).await
    }

    pub async fn load_with(
        store: SharedStore,
        default_cooldown_secs: u64,
        selector: Selector,
    ) -> Self {
        let state = match store.get(ROTATION_ENTRY).await {
            Ok(Some(text)) => match serde_json::from_str::<RotationDocument>(&text) {
                Ok(doc) => State::from_document(doc),
                Err(err) => {
                    tracing::warn!("discarding corrupt rotation document: {}", err);
                    State::default()
                }
            },
            Ok(None) => State::default(),
            Err(err) => {
                tracing::warn!("rotation state unavailable, starting empty: {}", err);
                State::default()
            }
        };

        Self {
            state: RwLock::new(state),
            store,
            default_cooldown_secs,
            selector,
        }
    }

    /// Replace the working set. Status records for keys absent from the new
    /// set are dropped; records for retained keys are preserved.
    pub fn configure(&self, keys: Vec<String>) {
        {
            let mut state = self.state.write();
            state.keys = dedup_keys(keys);
            let keys = state.keys.clone();
            state.status.retain(|key, _| keys.contains(key));
        }
        self.persist();
    }

    /// Fetch a key list from a URL or local path and install it.
    ///
    /// The body is parsed as a JSON array of strings first, falling back to
    /// newline-separated entries.
    pub async fn load_from_source(&self, source: &str) -> Result<usize> {
        let text = if source.starts_with("http://") || source.starts_with("https://") {
            let response = reqwest::get(source)
                .await
                .map_err(|err| Error::SourceUnavailable(format!("{}: {}", source, err)))?;
            if !response.status().is_success() {
                return Err(Error::SourceUnavailable(format!(
                    "{}: HTTP {}",
                    source,
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|err| Error::SourceUnavailable(format!("{}: {}", source, err)))?
        } else {
            tokio::fs::read_to_string(source)
                .await
                .map_err(|err| Error::SourceUnavailable(format!("{}: {}", source, err)))?
        };

        let keys = parse_key_list(&text);
        if keys.is_empty() {
            return Err(Error::NoKeysFound(source.to_string()));
        }

        let count = keys.len();
        self.configure(keys);
        Ok(count)
    }

    /// One key chosen uniformly at random among those currently available,
    /// or `None` when the available set is empty.
    pub fn next_available(&self) -> Option<String> {
        let state = self.state.read();
        let now = now_ms();
        let available: Vec<&String> = state
            .keys
            .iter()
            .filter(|key| !state.status.get(*key).map_or(false, |s| s.is_cooling(now)))
            .collect();

        if available.is_empty() {
            return None;
        }
        Some(available[(self.selector)(available.len())].clone())
    }

    /// Availability snapshot for one rotation tier, in randomized order.
    ///
    /// A key cooling down for a *different* model stays eligible here: its
    /// quota exhaustion was observed on that model only. `next_available`
    /// keeps the strict cooldown invariant.
    pub fn available_for(&self, model: &str) -> Vec<String> {
        let state = self.state.read();
        let now = now_ms();
        let mut keys: Vec<String> = state
            .keys
            .iter()
            .filter(|key| match state.status.get(*key) {
                Some(status) if status.is_cooling(now) => {
                    status.last_exhausted_model.as_deref() != Some(model)
                }
                _ => true,
            })
            .cloned()
            .collect();
        drop(state);

        // Fisher-Yates with the injected selector
        for i in (1..keys.len()).rev() {
            let j = (self.selector)(i + 1);
            keys.swap(i, j);
        }
        keys
    }

    /// Put a key in cooldown after a recoverable failure. Unknown keys are
    /// added to the working set.
    pub fn mark_exhausted(&self, key: &str, model: &str, cooldown_secs: Option<u64>) {
        let cooldown = cooldown_secs.unwrap_or(self.default_cooldown_secs);
        let until = now_ms() + (cooldown as i64) * 1000;
        {
            let mut state = self.state.write();
            if !state.keys.iter().any(|k| k == key) {
                state.keys.push(key.to_string());
            }
            let status = state.status.entry(key.to_string()).or_default();
            status.exhausted_until = Some(until);
            status.last_exhausted_model = Some(model.to_string());
        }
        tracing::debug!(model, cooldown_secs = cooldown, "key placed in cooldown");
        self.persist();
    }

    pub fn is_available(&self, key: &str) -> bool {
        let state = self.state.read();
        if !state.keys.iter().any(|k| k == key) {
            return false;
        }
        !state
            .status
            .get(key)
            .map_or(false, |s| s.is_cooling(now_ms()))
    }

    pub fn available_count(&self) -> usize {
        let state = self.state.read();
        let now = now_ms();
        state
            .keys
            .iter()
            .filter(|key| !state.status.get(*key).map_or(false, |s| s.is_cooling(now)))
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.state.read().keys.len()
    }

    /// Raw working set, for wiring at boot. Not exposed over HTTP.
    pub fn keys(&self) -> Vec<String> {
        self.state.read().keys.clone()
    }

    /// Masked view for observability. Full key values never appear here.
    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        let state = self.state.read();
        let now = now_ms();
        state
            .keys
            .iter()
            .map(|key| {
                let status = state.status.get(key);
                KeySnapshot {
                    key: mask_key(key),
                    available: !status.map_or(false, |s| s.is_cooling(now)),
                    exhausted_until: status.and_then(|s| s.exhausted_until),
                    last_exhausted_model: status.and_then(|s| s.last_exhausted_model.clone()),
                }
            })
            .collect()
    }

    /// Fire-and-forget whole-document overwrite. In-memory state stays
    /// authoritative for this process whether or not the write lands.
    fn persist(&self) {
        let doc = {
            let state = self.state.read();
            RotationDocument {
                keys: state.keys.clone(),
                key_status: state.status.clone(),
                saved_at: now_ms(),
            }
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let text = match serde_json::to_string(&doc) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("rotation document serialization failed: {}", err);
                    return;
                }
            };
            if let Err(err) = store.put(ROTATION_ENTRY, text).await {
                tracing::warn!("rotation state write failed: {}", err);
            }
        });
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keys.into_iter()
        .filter(|key| !key.is_empty() && seen.insert(key.clone()))
        .collect()
}

/// Mask a key down to a short prefix/suffix for status output.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "…".to_string()
    }
}

/// Parse a key source body: JSON string array first, then line-separated.
fn parse_key_list(text: &str) -> Vec<String> {
    if let Ok(keys) = serde_json::from_str::<Vec<String>>(text) {
        return dedup_keys(keys);
    }
    dedup_keys(
        text.lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
    )
}
