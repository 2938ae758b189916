//! Backend HTTP Client
//!
//! Concrete implementation of the uniform provider-call signature against a
//! Gemini-style generative-model API. All request failures surface before
//! the first stream event, which is what the rotator's commit semantics
//! rely on.

use crate::api::completion::{ChatCompletionRequest, FunctionCall, ToolCall};
use crate::client::{ProviderEvent, ProviderResponse, ProviderUsage};
use crate::error::{Error, Result};
use async_stream::stream;
use backoff::ExponentialBackoff;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Transport-level retries per request (connect/timeout only)
const MAX_TRANSPORT_RETRIES: u32 = 2;

/// A boxed backend event stream
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// HTTP client for the generative-model backend
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // long completions
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }

    /// One-shot generation call.
    ///
    /// Transport failures (connect, timeout) are retried with exponential
    /// backoff; HTTP-level errors are returned for the rotator to classify.
    pub async fn generate(
        &self,
        key: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<ProviderResponse> {
        let url = self.url(model, "generateContent");
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            max_interval: Duration::from_secs(10),
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
            ..Default::default()
        };

        let mut retries = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", key)
                .json(request)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();

                    if !status.is_success() {
                        return Err(upstream_error(status.as_u16(), &body));
                    }

                    let parsed: GenerateContentResponse =
                        serde_json::from_str(&body).map_err(|e| Error::Upstream {
                            status: None,
                            message: format!(
                                "failed to decode backend response: {}. Body: {}",
                                e,
                                &body[..body.len().min(500)]
                            ),
                        })?;
                    return Ok(parsed.into_provider_response());
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && retries < MAX_TRANSPORT_RETRIES => {
                    retries += 1;
                    let wait = backoff.initial_interval * 2u32.pow(retries);
                    tracing::debug!(retries, "transport error, retrying: {}", e);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Open the backend's native SSE stream and decode it into events.
    pub async fn open_stream(
        &self,
        key: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<EventStream> {
        let url = format!("{}?alt=sse", self.url(model, "streamGenerateContent"));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status.as_u16(), &body));
        }

        let mut byte_stream = response.bytes_stream();
        let s = stream! {
            let mut buffer = String::new();
            let mut tool_index: u32 = 0;

            while let Some(chunk) = byte_stream.next().await {
                let bytes: bytes::Bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(Error::Stream(format!("stream read failed: {}", e)));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    match parse_sse_data(&line) {
                        Ok(Some(data)) => {
                            for event in events_from_chunk(data, &mut tool_index) {
                                yield Ok(event);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // Trailing data without a final newline
            let line = buffer.trim().to_string();
            if !line.is_empty() {
                match parse_sse_data(&line) {
                    Ok(Some(data)) => {
                        for event in events_from_chunk(data, &mut tool_index) {
                            yield Ok(event);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => yield Err(e),
                }
            }
        };

        Ok(Box::pin(s))
    }
}

/// Map a non-success backend response to an upstream error, extracting the
/// message from the standard error envelope when present.
fn upstream_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect());
    Error::Upstream {
        status: Some(status),
        message,
    }
}

/// Parse one SSE line: `data: {json}` becomes a decoded chunk, everything
/// else (comments, event/id/retry fields, blanks) is skipped.
fn parse_sse_data(line: &str) -> Result<Option<GenerateContentResponse>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(None);
        }
        let chunk: GenerateContentResponse = serde_json::from_str(data).map_err(|e| {
            Error::Stream(format!("failed to parse stream chunk: {}. Data: {}", e, data))
        })?;
        return Ok(Some(chunk));
    }

    Ok(None)
}

/// Flatten one decoded chunk into provider events, assigning tool-call
/// indices in arrival order.
fn events_from_chunk(
    chunk: GenerateContentResponse,
    tool_index: &mut u32,
) -> Vec<ProviderEvent> {
    let mut events = Vec::new();

    if let Some(candidate) = chunk.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(call) = part.function_call {
                    let index = *tool_index;
                    *tool_index += 1;
                    events.push(ProviderEvent::ToolCallDelta {
                        index,
                        id: Some(new_call_id()),
                        name: Some(call.name),
                        arguments: call.args.map(|a| a.to_string()).unwrap_or_default(),
                    });
                } else if let Some(text) = part.text {
                    if part.thought.unwrap_or(false) {
                        events.push(ProviderEvent::Thinking(text));
                    } else {
                        events.push(ProviderEvent::Text(text));
                    }
                }
            }
        }
    }

    if let Some(usage) = chunk.usage_metadata {
        events.push(ProviderEvent::Usage(usage.into_provider_usage()));
    }

    events
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Backend wire types
// ---------------------------------------------------------------------------

/// Request body for both generation endpoints
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<BackendContent>,

    pub contents: Vec<BackendContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<BackendToolDecl>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    pub parts: Vec<BackendPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<BackendFunctionCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<BackendFunctionResponse>,
}

impl BackendPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendFunctionCall {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendFunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: i32,
    pub include_thoughts: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendToolDecl {
    pub function_declarations: Vec<BackendFunctionDecl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendFunctionDecl {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<BackendContent>,

    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,

    #[serde(default)]
    pub candidates_token_count: u64,

    #[serde(default)]
    pub thoughts_token_count: u64,
}

impl UsageMetadata {
    fn into_provider_usage(self) -> ProviderUsage {
        ProviderUsage {
            input_tokens: self.prompt_token_count,
            output_tokens: self.candidates_token_count + self.thoughts_token_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl GenerateContentResponse {
    /// Assemble the non-streaming provider result.
    fn into_provider_response(self) -> ProviderResponse {
        let usage = self.usage_metadata.map(|u| u.into_provider_usage());
        let mut response = ProviderResponse {
            usage,
            ..Default::default()
        };

        let Some(candidate) = self.candidates.into_iter().next() else {
            return response;
        };

        let mut reasoning = String::new();
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(call) = part.function_call {
                    response.tool_calls.push(ToolCall {
                        id: new_call_id(),
                        call_type: "function".to_string(),
                        function: FunctionCall {
                            name: call.name,
                            arguments: call.args.map(|a| a.to_string()).unwrap_or_default(),
                        },
                    });
                } else if let Some(text) = part.text {
                    if part.thought.unwrap_or(false) {
                        reasoning.push_str(&text);
                    } else {
                        response.content.push_str(&text);
                    }
                }
            }
        }
        if !reasoning.is_empty() {
            response.reasoning = Some(reasoning);
        }

        response.finish_reason = Some(if !response.tool_calls.is_empty() {
            "tool_calls".to_string()
        } else {
            match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => "length".to_string(),
                _ => "stop".to_string(),
            }
        });
        response
    }
}

impl GenerateContentRequest {
    /// Translate a protocol request for one concrete backend model.
    ///
    /// The model matters because the thinking budget differs by family.
    pub fn from_chat(request: &ChatCompletionRequest, model: &str) -> Result<Self> {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            match message.role.as_str() {
                "system" => {
                    let text = message.content.to_text();
                    if !text.is_empty() {
                        system_parts.push(BackendPart::text(text));
                    }
                }
                "assistant" => {
                    let mut parts = Vec::new();
                    let text = message.content.to_text();
                    if !text.is_empty() {
                        parts.push(BackendPart::text(text));
                    }
                    for call in message.tool_calls.iter().flatten() {
                        parts.push(BackendPart {
                            function_call: Some(BackendFunctionCall {
                                name: call.function.name.clone(),
                                args: serde_json::from_str(&call.function.arguments).ok(),
                            }),
                            ..Default::default()
                        });
                    }
                    if !parts.is_empty() {
                        contents.push(BackendContent {
                            role: Some("model".to_string()),
                            parts,
                        });
                    }
                }
                "tool" => {
                    let name = message
                        .name
                        .clone()
                        .or_else(|| message.tool_call_id.clone())
                        .unwrap_or_else(|| "tool".to_string());
                    let text = message.content.to_text();
                    let response = serde_json::from_str(&text)
                        .unwrap_or(serde_json::Value::String(text));
                    contents.push(BackendContent {
                        role: Some("user".to_string()),
                        parts: vec![BackendPart {
                            function_response: Some(BackendFunctionResponse { name, response }),
                            ..Default::default()
                        }],
                    });
                }
                _ => {
                    if message.content.has_image() {
                        return Err(Error::UnsupportedInput(
                            "image content is not supported by this backend".to_string(),
                        ));
                    }
                    contents.push(BackendContent {
                        role: Some("user".to_string()),
                        parts: vec![BackendPart::text(message.content.to_text())],
                    });
                }
            }
        }

        let thinking_config = request.effective_thinking_budget().map(|budget| {
            // Flash can disable thinking; pro has a floor of 128 tokens.
            let floor = if model.contains("flash") { 0 } else { 128 };
            ThinkingConfig {
                thinking_budget: budget.max(floor),
                include_thoughts: request
                    .reasoning_effort
                    .map_or(true, |effort| effort.include_thoughts()),
            }
        });

        let response_mime_type = request
            .response_format
            .as_ref()
            .and_then(|format| format.get("type"))
            .and_then(|t| t.as_str())
            .filter(|t| *t == "json_object")
            .map(|_| "application/json".to_string());

        let generation_config = GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone().map(|s| s.into_vec()),
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            seed: request.seed,
            response_mime_type,
            thinking_config,
        };

        let tools = request.tools.as_ref().map(|tools| {
            vec![BackendToolDecl {
                function_declarations: tools
                    .iter()
                    .map(|tool| BackendFunctionDecl {
                        name: tool.function.name.clone(),
                        description: tool.function.description.clone(),
                        parameters: tool.function.parameters.clone(),
                    })
                    .collect(),
            }]
        });

        Ok(Self {
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(BackendContent {
                    role: None,
                    parts: system_parts,
                })
            },
            contents,
            generation_config: Some(generation_config),
            tools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::completion::{Message, MessageContent, ReasoningEffort};

    fn user_message(text: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
            reasoning: None,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn test_translation_splits_system_and_user() {
        let mut request = ChatCompletionRequest::new(
            "gemini-2.5-pro".to_string(),
            vec![
                Message {
                    role: "system".to_string(),
                    ..user_message("be brief")
                },
                user_message("hello"),
            ],
        );
        request.temperature = Some(0.7);

        let backend = GenerateContentRequest::from_chat(&request, "gemini-2.5-pro").unwrap();
        assert_eq!(
            backend.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("be brief")
        );
        assert_eq!(backend.contents.len(), 1);
        assert_eq!(backend.contents[0].role.as_deref(), Some("user"));
        assert_eq!(
            backend.generation_config.unwrap().temperature,
            Some(0.7)
        );
    }

    #[test]
    fn test_image_input_is_rejected() {
        let request = ChatCompletionRequest::new(
            "gemini-2.5-pro".to_string(),
            vec![Message {
                content: MessageContent::Parts(vec![crate::api::completion::ContentPart::ImageUrl {
                    image_url: crate::api::completion::ImageUrl {
                        url: "data:image/png;base64,x".to_string(),
                        detail: None,
                    },
                }]),
                ..user_message("")
            }],
        );

        let err = GenerateContentRequest::from_chat(&request, "gemini-2.5-pro").unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput(_)));
    }

    #[test]
    fn test_thinking_budget_respects_pro_floor() {
        let mut request =
            ChatCompletionRequest::new("gemini-2.5-pro".to_string(), vec![user_message("hi")]);
        request.reasoning_effort = Some(ReasoningEffort::None);

        let backend = GenerateContentRequest::from_chat(&request, "gemini-2.5-pro").unwrap();
        let thinking = backend.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(thinking.thinking_budget, 128);
        assert!(!thinking.include_thoughts);

        let backend = GenerateContentRequest::from_chat(&request, "gemini-2.5-flash").unwrap();
        let thinking = backend.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(thinking.thinking_budget, 0);
    }

    #[test]
    fn test_response_assembly_separates_thoughts() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "planning...", "thought": true},
                    {"text": "Answer."}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "thoughtsTokenCount": 3}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_provider_response();

        assert_eq!(response.content, "Answer.");
        assert_eq!(response.reasoning.as_deref(), Some("planning..."));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 4);
        assert_eq!(usage.output_tokens, 5);
    }

    #[test]
    fn test_function_call_becomes_tool_call() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "get_weather", "args": {"city": "Oslo"}}}
                ]}
            }]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_provider_response();

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].function.name, "get_weather");
        assert!(response.tool_calls[0].function.arguments.contains("Oslo"));
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_parse_sse_data_variants() {
        assert!(parse_sse_data("").unwrap().is_none());
        assert!(parse_sse_data(": keepalive").unwrap().is_none());
        assert!(parse_sse_data("data: [DONE]").unwrap().is_none());
        assert!(parse_sse_data("event: message").unwrap().is_none());

        let chunk = parse_sse_data(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.candidates.len(), 1);

        assert!(parse_sse_data("data: {broken").is_err());
    }

    #[test]
    fn test_events_from_chunk_assigns_tool_indices() {
        let chunk: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"functionCall":{"name":"a","args":{}}},
                {"functionCall":{"name":"b","args":{}}}
            ]}}]}"#,
        )
        .unwrap();

        let mut tool_index = 0;
        let events = events_from_chunk(chunk, &mut tool_index);
        assert_eq!(events.len(), 2);
        let indices: Vec<u32> = events
            .iter()
            .map(|e| match e {
                ProviderEvent::ToolCallDelta { index, .. } => *index,
                _ => panic!("expected tool call"),
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(tool_index, 2);
    }

    #[tokio::test]
    async fn test_generate_against_mock_backend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.5-pro:generateContent")
            .match_header("x-goog-api-key", "secret-key")
            .with_status(200)
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"pong"}]},"finishReason":"STOP"}]}"#,
            )
            .create_async()
            .await;

        let client = BackendClient::new(&server.url()).unwrap();
        let request = GenerateContentRequest::from_chat(
            &ChatCompletionRequest::new("gemini-2.5-pro".to_string(), vec![user_message("ping")]),
            "gemini-2.5-pro",
        )
        .unwrap();

        let response = client
            .generate("secret-key", "gemini-2.5-pro", &request)
            .await
            .unwrap();
        assert_eq!(response.content, "pong");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_surfaces_rate_limit_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1beta/models/gemini-2.5-flash:generateContent")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Quota exceeded for quota metric"}}"#)
            .create_async()
            .await;

        let client = BackendClient::new(&server.url()).unwrap();
        let request = GenerateContentRequest::default();
        let err = client
            .generate("k", "gemini-2.5-flash", &request)
            .await
            .unwrap_err();

        match err {
            Error::Upstream { status, message } => {
                assert_eq!(status, Some(429));
                assert_eq!(message, "Quota exceeded for quota metric");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_stream_decodes_sse_events() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Regex(":streamGenerateContent".into()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}],",
                "\"usageMetadata\":{\"promptTokenCount\":1,\"candidatesTokenCount\":2}}\n\n",
            ))
            .create_async()
            .await;

        let client = BackendClient::new(&server.url()).unwrap();
        let stream = client
            .open_stream("k", "gemini-2.5-pro", &GenerateContentRequest::default())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 3);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            ProviderEvent::Text("Hel".to_string())
        );
        assert_eq!(
            *events[1].as_ref().unwrap(),
            ProviderEvent::Text("lo".to_string())
        );
        assert!(matches!(
            events[2].as_ref().unwrap(),
            ProviderEvent::Usage(u) if u.input_tokens == 1 && u.output_tokens == 2
        ));
    }
}
