//! Credential Rotation
//!
//! Selects a (credential, model tier) pair for each call, classifies
//! upstream failures, and walks the remaining search space before giving
//! up. The rotator performs no network I/O itself; provider calls are
//! injected.

use crate::error::{Error, Result};
use crate::router::key_store::KeyStore;
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Fixed delay between credentials after a rate-limit failure
const ROTATE_BACKOFF: Duration = Duration::from_millis(100);

/// How an upstream failure affects the search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rate limit or quota exhaustion: cool the key down, try the next one
    RateLimited,
    /// Upstream timeout: same remediation, jittered backoff
    UpstreamTimeout,
    /// Everything else: propagate immediately
    Fatal,
}

/// Classify an upstream failure for rotation purposes.
pub fn classify(err: &Error) -> FailureClass {
    let Error::Upstream { status, message } = err else {
        return FailureClass::Fatal;
    };

    match status {
        Some(429) | Some(403) => return FailureClass::RateLimited,
        Some(524) => return FailureClass::UpstreamTimeout,
        _ => {}
    }

    let message = message.to_lowercase();
    if message.contains("rate limit") || message.contains("quota") || message.contains("exhaust") {
        FailureClass::RateLimited
    } else if message.contains("524") {
        FailureClass::UpstreamTimeout
    } else {
        FailureClass::Fatal
    }
}

/// Jittered backoff for upstream timeouts, to desynchronize retries across
/// instances. 100-300 ms, stdlib-hash randomness.
fn timeout_backoff() -> Duration {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    Duration::from_millis(100 + hasher.finish() % 201)
}

/// The scheduling brain: tier fallback plus per-tier key rotation
#[derive(Clone)]
pub struct Rotator {
    key_store: Arc<KeyStore>,
    tiers: Vec<String>,
    tier_fallback: bool,
    cooldown_override_secs: Option<u64>,
}

impl Rotator {
    pub fn new(key_store: Arc<KeyStore>, tiers: Vec<String>) -> Self {
        Self::with_options(key_store, tiers, true, None)
    }

    pub fn with_options(
        key_store: Arc<KeyStore>,
        tiers: Vec<String>,
        tier_fallback: bool,
        cooldown_override_secs: Option<u64>,
    ) -> Self {
        Self {
            key_store,
            tiers,
            tier_fallback,
            cooldown_override_secs,
        }
    }

    pub fn tiers(&self) -> &[String] {
        &self.tiers
    }

    /// Tier range for one call: from the requested model's index (0 if the
    /// model is not a known tier) forward, never back.
    fn tier_range(&self, model: &str) -> std::ops::Range<usize> {
        let start = self.tiers.iter().position(|t| t == model).unwrap_or(0);
        let end = if self.tier_fallback {
            self.tiers.len()
        } else {
            start + 1
        };
        start..end
    }

    async fn handle_recoverable(&self, class: FailureClass, key: &str, tier: &str) {
        self.key_store
            .mark_exhausted(key, tier, self.cooldown_override_secs);
        let backoff = match class {
            FailureClass::UpstreamTimeout => timeout_backoff(),
            _ => ROTATE_BACKOFF,
        };
        tokio::time::sleep(backoff).await;
    }

    /// One-shot generation across the search space.
    ///
    /// `call` receives (credential, model) and performs the actual backend
    /// request. Each credential in a tier's availability snapshot is
    /// attempted at most once.
    pub async fn generate_content<R, F, Fut>(&self, model: &str, call: F) -> Result<R>
    where
        F: Fn(String, String) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        for tier_index in self.tier_range(model) {
            let tier = self.tiers[tier_index].clone();
            let snapshot = self.key_store.available_for(&tier);
            if snapshot.is_empty() {
                tracing::debug!(%tier, "no available keys for tier, moving on");
                continue;
            }

            let mut tried = HashSet::new();
            for key in snapshot {
                if !tried.insert(key.clone()) {
                    continue;
                }
                match call(key.clone(), tier.clone()).await {
                    Ok(result) => return Ok(result),
                    Err(err) => match classify(&err) {
                        FailureClass::Fatal => return Err(err),
                        class => {
                            tracing::info!(%tier, class = ?class, "recoverable failure, rotating");
                            self.handle_recoverable(class, &key, &tier).await;
                        }
                    },
                }
            }
        }

        Err(Error::NoAvailableKeys)
    }

    /// Streaming counterpart.
    ///
    /// `open` yields a backend-native event stream per (credential, model).
    /// Once the first event has been forwarded the attempt is committed:
    /// later failures are still classified (cooldowns recorded) but never
    /// retried on another credential; the error surfaces in-band as the
    /// final item. The provider contract is that `open` fails strictly
    /// before its first event in well-formed backends.
    pub fn stream_content<T, F, Fut, S>(
        &self,
        model: &str,
        open: F,
    ) -> Pin<Box<dyn Stream<Item = Result<T>> + Send>>
    where
        T: Send + 'static,
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
        S: Stream<Item = Result<T>> + Send + Unpin + 'static,
    {
        let rotator = self.clone();
        let model = model.to_string();

        Box::pin(stream! {
            for tier_index in rotator.tier_range(&model) {
                let tier = rotator.tiers[tier_index].clone();
                let snapshot = rotator.key_store.available_for(&tier);
                if snapshot.is_empty() {
                    continue;
                }

                let mut tried = HashSet::new();
                for key in snapshot {
                    if !tried.insert(key.clone()) {
                        continue;
                    }

                    let mut source = match open(key.clone(), tier.clone()).await {
                        Ok(source) => source,
                        Err(err) => match classify(&err) {
                            FailureClass::Fatal => {
                                yield Err(err);
                                return;
                            }
                            class => {
                                rotator.handle_recoverable(class, &key, &tier).await;
                                continue;
                            }
                        },
                    };

                    let mut committed = false;
                    let mut failure = None;
                    while let Some(item) = source.next().await {
                        match item {
                            Ok(event) => {
                                committed = true;
                                yield Ok(event);
                            }
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }

                    match failure {
                        None => return,
                        Some(err) => {
                            let class = classify(&err);
                            if committed {
                                // Partial output already reached the caller;
                                // the response cannot be renegotiated.
                                if class != FailureClass::Fatal {
                                    rotator.key_store.mark_exhausted(
                                        &key,
                                        &tier,
                                        rotator.cooldown_override_secs,
                                    );
                                }
                                yield Err(err);
                                return;
                            }
                            match class {
                                FailureClass::Fatal => {
                                    yield Err(err);
                                    return;
                                }
                                class => {
                                    rotator.handle_recoverable(class, &key, &tier).await;
                                }
                            }
                        }
                    }
                }
            }

            yield Err(Error::NoAvailableKeys);
        })
    }
}
