//! llmrelay - Protocol-Translating LLM Gateway
//!
//! Accepts OpenAI-style chat completion requests and relays them to a
//! Gemini-style backend, spreading the load across a pool of
//! interchangeable credentials with cooldown-aware rotation, model-tier
//! fallback, and a streaming response bridge.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod router;
pub mod server;
pub mod store;
pub mod usage;

use std::sync::Arc;

use client::{BackendClient, OauthCredential};
use config::Settings;
use error::Result;
use router::key_store::default_selector;
use router::pool::DEFAULT_POOL_COOLDOWN;
use router::{CredentialPool, KeyStore, Rotator};
use server::AppState;
use store::{FileStore, MemoryStore, SharedStore};
use usage::UsageRecorder;

/// The assembled gateway: one instance per process, constructed from
/// settings at boot and shared across all inbound calls.
pub struct Gateway {
    pub key_store: Arc<KeyStore>,
    pub rotator: Arc<Rotator>,
    pub recorder: Arc<UsageRecorder>,
    pub backend: Arc<BackendClient>,
    /// Round-robin pool over structured OAuth credentials, when configured
    pub pool: Option<Arc<CredentialPool<OauthCredential>>>,
}

impl Gateway {
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let store: SharedStore = match &settings.state_path {
            Some(path) => Arc::new(FileStore::new(path.clone())),
            None => Arc::new(MemoryStore::new()),
        };

        let key_store = Arc::new(
            KeyStore::load_with(store.clone(), settings.cooldown_secs, default_selector()).await,
        );

        // An unreachable key source must not take the gateway down when
        // keys are also configured directly.
        if let Some(source) = &settings.key_source {
            match key_store.load_from_source(source).await {
                Ok(count) => tracing::info!(count, source = source.as_str(), "loaded key source"),
                Err(err) => tracing::warn!("key source skipped: {}", err),
            }
        }

        if !settings.keys.is_empty() {
            let mut keys = key_store.keys();
            keys.extend(settings.keys.iter().cloned());
            key_store.configure(keys);
        }

        if key_store.total_count() == 0 {
            tracing::warn!("no credentials configured; calls will fail until keys are loaded");
        }

        let recorder = Arc::new(UsageRecorder::load(store).await);
        let rotator = Arc::new(Rotator::with_options(
            key_store.clone(),
            settings.tiers.clone(),
            settings.tier_fallback,
            None,
        ));
        let backend = Arc::new(BackendClient::new(&settings.backend_base_url)?);

        let pool = if settings.oauth_credentials.is_empty() {
            None
        } else {
            Some(Arc::new(CredentialPool::new(
                settings.oauth_credentials.clone(),
                DEFAULT_POOL_COOLDOWN,
                settings.pool_error_threshold,
            )))
        };

        Ok(Self {
            key_store,
            rotator,
            recorder,
            backend,
            pool,
        })
    }

    /// Axum router serving the full HTTP surface.
    pub fn router(&self) -> axum::Router {
        server::router(AppState {
            rotator: self.rotator.clone(),
            key_store: self.key_store.clone(),
            recorder: self.recorder.clone(),
            backend: self.backend.clone(),
            pool: self.pool.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gateway_from_settings() {
        let mut settings = Settings::default();
        settings.keys = vec!["boot-key-1".to_string(), "boot-key-2".to_string()];

        let gateway = Gateway::from_settings(&settings).await.unwrap();
        assert_eq!(gateway.key_store.total_count(), 2);
        assert_eq!(gateway.rotator.tiers().len(), 2);

        // Router construction wires every route without panicking.
        let _ = gateway.router();
    }

    #[tokio::test]
    async fn test_gateway_builds_pool_from_oauth_credentials() {
        let mut settings = Settings::default();
        settings.pool_error_threshold = 5;
        settings.oauth_credentials = vec![OauthCredential {
            access_token: "ya29.token".to_string(),
            refresh_token: "1//refresh".to_string(),
            expires_at: 1_754_500_000_000,
            project_id: Some("proj-1".to_string()),
        }];

        let gateway = Gateway::from_settings(&settings).await.unwrap();
        let pool = gateway.pool.as_ref().unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.next().is_ok());
    }

    #[tokio::test]
    async fn test_gateway_tolerates_dead_key_source() {
        let mut settings = Settings::default();
        settings.keys = vec!["direct-key".to_string()];
        settings.key_source = Some("/nonexistent/keys.txt".to_string());

        let gateway = Gateway::from_settings(&settings).await.unwrap();
        assert_eq!(gateway.key_store.total_count(), 1);
        assert!(gateway.key_store.is_available("direct-key"));
    }
}
