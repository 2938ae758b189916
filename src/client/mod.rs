//! Backend Provider Boundary
//!
//! The uniform call signature the rotator schedules over, plus the
//! backend-native event vocabulary the stream bridge consumes.

pub mod backend;

pub use backend::BackendClient;

use crate::api::completion::ToolCall;
use serde::Deserialize;

/// Structured long-lived credential, as supplied by configuration.
///
/// Acquisition (the OAuth exchange producing this pair) happens outside
/// the gateway; entries are immutable once loaded. These rotate through a
/// [`crate::router::CredentialPool`] rather than the key store.
#[derive(Debug, Clone, Deserialize)]
pub struct OauthCredential {
    pub access_token: String,

    pub refresh_token: String,

    /// Epoch milliseconds
    pub expires_at: i64,

    #[serde(default)]
    pub project_id: Option<String>,
}

/// One backend-native stream event
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Incremental answer text
    Text(String),

    /// Incremental reasoning text
    Thinking(String),

    /// Tool-call argument fragment, concatenated by call index downstream.
    /// Fragments are forwarded as-is; nothing here validates them as JSON.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },

    /// Token accounting, typically carried by the terminal event
    Usage(ProviderUsage),
}

/// Backend token accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Assembled non-streaming backend result
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<ProviderUsage>,
}
