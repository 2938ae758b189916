//! Stream Bridge
//!
//! Converts a backend-native event sequence into protocol-compliant
//! streaming chunks. Single-pass and non-restartable: a retry needs a new
//! source sequence and a new bridge. Output goes through a bounded channel,
//! so production never outruns the transport.

use crate::api::completion::Usage;
use crate::api::streaming::{FunctionDelta, StreamChunk, ToolCallDelta};
use crate::client::{ProviderEvent, ProviderUsage};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Bounded channel capacity between the bridge task and the transport
const CHUNK_BUFFER: usize = 16;

/// Bridges one backend event stream into one chunk stream
pub struct StreamBridge {
    id: String,
    model: String,
    created: u64,
}

impl StreamBridge {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp() as u64,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the bridging task and hand back the consumer side.
    pub fn into_stream<S>(self, source: S) -> ReceiverStream<StreamChunk>
    where
        S: Stream<Item = crate::error::Result<ProviderEvent>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        tokio::spawn(async move {
            self.run(source, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Drain the source into `tx`, chunk by chunk, in arrival order.
    ///
    /// Every send suspends until the transport accepts the previous chunk;
    /// a closed receiver ends the drain silently (the consumer went away).
    pub async fn run<S>(self, source: S, tx: mpsc::Sender<StreamChunk>)
    where
        S: Stream<Item = crate::error::Result<ProviderEvent>> + Send,
    {
        let Self { id, model, created } = self;

        if tx.send(StreamChunk::role(&id, &model, created)).await.is_err() {
            return;
        }

        let mut saw_tool_call = false;
        let mut usage: Option<ProviderUsage> = None;

        futures::pin_mut!(source);
        while let Some(item) = source.next().await {
            let chunk = match item {
                Ok(ProviderEvent::Text(text)) => StreamChunk::content(&id, &model, created, &text),
                Ok(ProviderEvent::Thinking(text)) => {
                    StreamChunk::reasoning(&id, &model, created, &text)
                }
                Ok(ProviderEvent::ToolCallDelta {
                    index,
                    id: call_id,
                    name,
                    arguments,
                }) => {
                    saw_tool_call = true;
                    let call_type = call_id.as_ref().map(|_| "function".to_string());
                    StreamChunk::tool_call(
                        &id,
                        &model,
                        created,
                        ToolCallDelta {
                            index,
                            id: call_id,
                            call_type,
                            function: Some(FunctionDelta {
                                name,
                                arguments: Some(arguments),
                            }),
                        },
                    )
                }
                Ok(ProviderEvent::Usage(u)) => {
                    usage = Some(u);
                    continue;
                }
                Err(err) => {
                    // The response status is already committed; report the
                    // failure in-band and close.
                    tracing::warn!("stream failed mid-drain: {}", err);
                    let _ = tx
                        .send(StreamChunk::terminal_error(&id, &model, created, &err.to_string()))
                        .await;
                    return;
                }
            };

            if tx.send(chunk).await.is_err() {
                return;
            }
        }

        let reason = if saw_tool_call { "tool_calls" } else { "stop" };
        if tx
            .send(StreamChunk::finish(&id, &model, created, reason))
            .await
            .is_err()
        {
            return;
        }

        if let Some(u) = usage {
            let _ = tx
                .send(StreamChunk::usage(&id, &model, created, usage_to_wire(u)))
                .await;
        }
    }
}

fn usage_to_wire(usage: ProviderUsage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use futures::stream;

    async fn bridge(events: Vec<Result<ProviderEvent>>) -> Vec<StreamChunk> {
        StreamBridge::new("gemini-2.5-pro")
            .into_stream(stream::iter(events))
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_role_first_then_content_in_order() {
        let chunks = bridge(vec![
            Ok(ProviderEvent::Text("Hello".into())),
            Ok(ProviderEvent::Thinking("hmm".into())),
            Ok(ProviderEvent::Text(" World".into())),
        ])
        .await;

        assert_eq!(chunks.len(), 5, "role + three deltas + finish");
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("Hello"));
        assert_eq!(chunks[2].choices[0].delta.reasoning.as_deref(), Some("hmm"));
        assert_eq!(chunks[3].choices[0].delta.content.as_deref(), Some(" World"));
        assert_eq!(chunks[4].finish_reason(), Some("stop"));
    }

    #[tokio::test]
    async fn test_exactly_one_finish_chunk() {
        let chunks = bridge(vec![
            Ok(ProviderEvent::Text("a".into())),
            Ok(ProviderEvent::Text("b".into())),
        ])
        .await;

        let finish_count = chunks.iter().filter(|c| c.finish_reason().is_some()).count();
        assert_eq!(finish_count, 1);
        assert!(chunks.last().unwrap().finish_reason().is_some());
    }

    #[tokio::test]
    async fn test_tool_calls_set_finish_reason() {
        let chunks = bridge(vec![
            Ok(ProviderEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("get_weather".into()),
                arguments: r#"{"city":"#.into(),
            }),
            Ok(ProviderEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: r#""Oslo"}"#.into(),
            }),
        ])
        .await;

        let first = &chunks[1].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(first.id.as_deref(), Some("call_1"));
        assert_eq!(first.call_type.as_deref(), Some("function"));
        assert_eq!(
            first.function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );

        let second = &chunks[2].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert!(second.id.is_none(), "continuation fragment has no id");
        assert_eq!(
            second.function.as_ref().unwrap().arguments.as_deref(),
            Some(r#""Oslo"}"#)
        );

        assert_eq!(chunks.last().unwrap().finish_reason(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_usage_chunk_follows_finish() {
        let chunks = bridge(vec![
            Ok(ProviderEvent::Text("hi".into())),
            Ok(ProviderEvent::Usage(ProviderUsage {
                input_tokens: 7,
                output_tokens: 3,
            })),
        ])
        .await;

        let last = chunks.last().unwrap();
        let usage = last.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.total_tokens, 10);
        assert_eq!(chunks[chunks.len() - 2].finish_reason(), Some("stop"));
    }

    #[tokio::test]
    async fn test_upstream_error_becomes_terminal_chunk() {
        let chunks = bridge(vec![
            Ok(ProviderEvent::Text("partial".into())),
            Err(Error::Upstream {
                status: Some(500),
                message: "backend gave up".into(),
            }),
        ])
        .await;

        let last = chunks.last().unwrap();
        let error = last.error.as_ref().unwrap();
        assert!(error.message.contains("backend gave up"));
        // No finish chunk after an error; the stream just closes.
        assert!(chunks.iter().all(|c| c.finish_reason().is_none()));
        assert_eq!(chunks.len(), 3, "role + partial + terminal error");
    }

    #[tokio::test]
    async fn test_empty_source_still_emits_role_and_stop() {
        let chunks = bridge(vec![]).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].finish_reason(), Some("stop"));
    }
}
