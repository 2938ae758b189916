//! Request Routing
//!
//! The thin HTTP layer over the core: validation happens here and only
//! here, then the rotator takes over. Streaming responses are SSE chunks
//! terminated by an explicit `[DONE]` marker.

use crate::api::bridge::StreamBridge;
use crate::api::completion::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, Message, MessageContent, ModelEntry,
    ModelList, Usage,
};
use crate::client::backend::GenerateContentRequest;
use crate::client::{BackendClient, OauthCredential, ProviderEvent, ProviderResponse};
use crate::error::{Error, Result};
use crate::router::key_store::mask_key;
use crate::router::{CredentialPool, KeySnapshot, KeyStore, PoolEntryStatus, Rotator};
use crate::usage::{KeySummary, ModelSummary, UsageEvent, UsageRecorder};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

/// Shared handles for all route handlers
#[derive(Clone)]
pub struct AppState {
    pub rotator: Arc<Rotator>,
    pub key_store: Arc<KeyStore>,
    pub recorder: Arc<UsageRecorder>,
    pub backend: Arc<BackendClient>,
    pub pool: Option<Arc<CredentialPool<OauthCredential>>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/status", get(status))
        .with_state(state)
}

/// Read-only gateway status: masked credentials and usage aggregates
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub available_keys: usize,
    pub total_keys: usize,
    pub keys: Vec<KeySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<Vec<PoolEntryStatus>>,
    pub usage_by_key: Vec<KeySummary>,
    pub usage_by_model: Vec<ModelSummary>,
}

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let created = chrono::Utc::now().timestamp() as u64;
    Json(ModelList {
        object: "list".to_string(),
        data: state
            .rotator
            .tiers()
            .iter()
            .map(|id| ModelEntry {
                id: id.clone(),
                object: "model".to_string(),
                created,
                owned_by: "google".to_string(),
            })
            .collect(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let usage_by_key = state
        .recorder
        .key_summaries()
        .into_iter()
        .map(|mut summary| {
            if summary.key != "anonymous" {
                summary.key = mask_key(&summary.key);
            }
            summary
        })
        .collect();

    Json(StatusResponse {
        available_keys: state.key_store.available_count(),
        total_keys: state.key_store.total_count(),
        keys: state.key_store.snapshot(),
        pool: state.pool.as_ref().map(|pool| pool.snapshot()),
        usage_by_key,
        usage_by_model: state.recorder.model_totals(),
    })
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if let Err(err) = validate(&request, state.rotator.tiers()) {
        return error_response(&err);
    }

    if request.wants_stream() {
        stream_completion(state, request).await
    } else {
        unary_completion(state, request).await
    }
}

/// Fail fast before any provider call.
fn validate(request: &ChatCompletionRequest, tiers: &[String]) -> Result<()> {
    if request.model.trim().is_empty() {
        return Err(Error::Validation("'model' must not be empty".to_string()));
    }
    if !tiers.iter().any(|t| t == &request.model) {
        return Err(Error::ModelNotFound {
            model: request.model.clone(),
            available: tiers.to_vec(),
        });
    }
    if request.messages.is_empty() {
        return Err(Error::Validation(
            "'messages' must contain at least one entry".to_string(),
        ));
    }
    for message in &request.messages {
        if message.role.trim().is_empty() {
            return Err(Error::Validation(
                "every message needs a 'role'".to_string(),
            ));
        }
        if message.content.has_image() {
            return Err(Error::UnsupportedInput(
                "image content is not supported by this backend".to_string(),
            ));
        }
    }
    Ok(())
}

async fn unary_completion(state: AppState, request: ChatCompletionRequest) -> Response {
    let requested_model = request.model.clone();
    let request = Arc::new(request);
    let backend = state.backend.clone();
    let recorder = state.recorder.clone();

    let call = move |key: String, model: String| {
        let backend = backend.clone();
        let recorder = recorder.clone();
        let request = request.clone();
        async move {
            let translated = GenerateContentRequest::from_chat(&request, &model)?;
            let response = backend.generate(&key, &model, &translated).await?;
            if let Some(usage) = response.usage {
                recorder.record(UsageEvent {
                    key: Some(key),
                    model,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    timestamp: None,
                });
            }
            Ok(response)
        }
    };

    match state.rotator.generate_content(&requested_model, call).await {
        Ok(provider) => Json(completion_response(&requested_model, provider)).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn stream_completion(state: AppState, request: ChatCompletionRequest) -> Response {
    let requested_model = request.model.clone();
    let request = Arc::new(request);
    let backend = state.backend.clone();
    let recorder = state.recorder.clone();

    let open = move |key: String, model: String| {
        let backend = backend.clone();
        let recorder = recorder.clone();
        let request = request.clone();
        async move {
            let translated = GenerateContentRequest::from_chat(&request, &model)?;
            let events = backend.open_stream(&key, &model, &translated).await?;
            // Feed the recorder from the side as usage flows past.
            let events = events.inspect(move |item| {
                if let Ok(ProviderEvent::Usage(usage)) = item {
                    recorder.record(UsageEvent {
                        key: Some(key.clone()),
                        model: model.clone(),
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        timestamp: None,
                    });
                }
            });
            Ok(events)
        }
    };

    let events = state.rotator.stream_content(&requested_model, open);
    let chunks = StreamBridge::new(&requested_model).into_stream(events);

    let sse = chunks
        .map(|chunk| {
            let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
            Ok::<_, Infallible>(Event::default().data(data))
        })
        .chain(futures::stream::once(async {
            Ok(Event::default().data("[DONE]"))
        }));

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

fn completion_response(model: &str, provider: ProviderResponse) -> ChatCompletionResponse {
    let ProviderResponse {
        content,
        reasoning,
        tool_calls,
        finish_reason,
        usage,
    } = provider;

    let finish_reason = finish_reason.unwrap_or_else(|| {
        if tool_calls.is_empty() {
            "stop".to_string()
        } else {
            "tool_calls".to_string()
        }
    });

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message {
                role: "assistant".to_string(),
                content: MessageContent::Text(content),
                reasoning,
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }),
    }
}

fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": error_type(err),
            "code": status.as_u16(),
        }
    });
    (status, Json(body)).into_response()
}

fn error_type(err: &Error) -> &'static str {
    match err {
        Error::Validation(_) | Error::ModelNotFound { .. } | Error::UnsupportedInput(_) => {
            "invalid_request_error"
        }
        Error::NoAvailableKeys | Error::PoolExhausted => "capacity_exhausted",
        Error::Upstream { .. } => "upstream_error",
        _ => "server_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tiers() -> Vec<String> {
        vec!["gemini-2.5-pro".to_string(), "gemini-2.5-flash".to_string()]
    }

    async fn test_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let key_store = Arc::new(KeyStore::load(store.clone()).await);
        AppState {
            rotator: Arc::new(Rotator::new(key_store.clone(), tiers())),
            key_store,
            recorder: Arc::new(UsageRecorder::load(store).await),
            backend: Arc::new(BackendClient::new("http://127.0.0.1:1").unwrap()),
            pool: None,
        }
    }

    fn request_json(json: &str) -> ChatCompletionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validate_unknown_model_lists_tiers() {
        let request = request_json(
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}]}"#,
        );
        let err = validate(&request, &tiers()).unwrap_err();
        match err {
            Error::ModelNotFound { model, available } => {
                assert_eq!(model, "gpt-4");
                assert_eq!(available, tiers());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_requires_messages_and_roles() {
        let request = request_json(r#"{"model":"gemini-2.5-pro","messages":[]}"#);
        assert!(matches!(
            validate(&request, &tiers()).unwrap_err(),
            Error::Validation(_)
        ));

        let request = request_json(
            r#"{"model":"gemini-2.5-pro","messages":[{"role":"","content":"hi"}]}"#,
        );
        assert!(matches!(
            validate(&request, &tiers()).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_validate_rejects_image_input() {
        let request = request_json(
            r#"{"model":"gemini-2.5-pro","messages":[{"role":"user","content":[
                {"type":"image_url","image_url":{"url":"data:image/png;base64,x"}}
            ]}]}"#,
        );
        assert!(matches!(
            validate(&request, &tiers()).unwrap_err(),
            Error::UnsupportedInput(_)
        ));
    }

    #[tokio::test]
    async fn test_models_listing() {
        let state = test_state().await;
        let Json(models) = list_models(State(state)).await;
        assert_eq!(models.object, "list");
        assert_eq!(models.data.len(), 2);
        assert_eq!(models.data[0].id, "gemini-2.5-pro");
        assert_eq!(models.data[0].owned_by, "google");
    }

    #[tokio::test]
    async fn test_status_masks_key_material() {
        let state = test_state().await;
        state
            .key_store
            .configure(vec!["AIzaSyVerySecretKeyMaterial".to_string()]);
        state.recorder.record(UsageEvent {
            key: Some("AIzaSyVerySecretKeyMaterial".to_string()),
            model: "gemini-2.5-pro".to_string(),
            input_tokens: 5,
            output_tokens: 7,
            timestamp: None,
        });

        let Json(status) = status(State(state)).await;
        assert_eq!(status.total_keys, 1);
        assert_eq!(status.available_keys, 1);

        let serialized = serde_json::to_string(&status).unwrap();
        assert!(!serialized.contains("VerySecret"));
        assert_eq!(status.usage_by_key[0].key, "AIza…rial");
        assert_eq!(status.usage_by_model[0].calls, 1);
    }

    #[test]
    fn test_completion_response_shape() {
        let provider = ProviderResponse {
            content: "hello".to_string(),
            reasoning: Some("thinking".to_string()),
            tool_calls: vec![],
            finish_reason: Some("stop".to_string()),
            usage: Some(crate::client::ProviderUsage {
                input_tokens: 3,
                output_tokens: 4,
            }),
        };

        let response = completion_response("gemini-2.5-pro", provider);
        assert!(response.id.starts_with("chatcmpl-"));
        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.model, "gemini-2.5-pro");
        assert_eq!(response.choices[0].message.content.to_text(), "hello");
        assert_eq!(
            response.choices[0].message.reasoning.as_deref(),
            Some("thinking")
        );
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 7);
    }

    #[test]
    fn test_error_types_by_class() {
        assert_eq!(
            error_type(&Error::Validation("x".into())),
            "invalid_request_error"
        );
        assert_eq!(error_type(&Error::NoAvailableKeys), "capacity_exhausted");
        assert_eq!(error_type(&Error::PoolExhausted), "capacity_exhausted");
        assert_eq!(
            error_type(&Error::Upstream {
                status: Some(500),
                message: "x".into()
            }),
            "upstream_error"
        );
    }
}
