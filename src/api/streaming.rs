//! Streaming Chunk Types
//!
//! Protocol-compliant server-sent chunk shapes emitted by the stream
//! bridge.

use crate::api::completion::Usage;
use serde::{Deserialize, Serialize};

/// A streaming chunk of the completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,

    pub object: String,

    pub created: u64,

    pub model: String,

    pub choices: Vec<StreamChoice>,

    /// Usage info, only on the final accounting chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// In-band error payload. Not a protocol-standard field: mid-stream
    /// failures cannot change the committed response status, so this is
    /// the only channel left to report them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StreamError>,
}

/// Human-readable error payload for a terminal chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,

    pub delta: StreamDelta,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Role, only in the first chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reasoning delta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Delta for tool calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index in the tool_calls array
    pub index: u32,

    /// Tool call ID, only on the first fragment of a call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub call_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Delta for function calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Function name, only on the first fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Arguments fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl StreamChunk {
    fn base(id: &str, model: &str, created: u64) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: Vec::new(),
            usage: None,
            error: None,
        }
    }

    fn with_delta(id: &str, model: &str, created: u64, delta: StreamDelta) -> Self {
        let mut chunk = Self::base(id, model, created);
        chunk.choices.push(StreamChoice {
            index: 0,
            delta,
            finish_reason: None,
        });
        chunk
    }

    /// First chunk of every stream: declares the assistant role.
    pub fn role(id: &str, model: &str, created: u64) -> Self {
        Self::with_delta(
            id,
            model,
            created,
            StreamDelta {
                role: Some("assistant".to_string()),
                ..Default::default()
            },
        )
    }

    pub fn content(id: &str, model: &str, created: u64, text: &str) -> Self {
        Self::with_delta(
            id,
            model,
            created,
            StreamDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn reasoning(id: &str, model: &str, created: u64, text: &str) -> Self {
        Self::with_delta(
            id,
            model,
            created,
            StreamDelta {
                reasoning: Some(text.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn tool_call(id: &str, model: &str, created: u64, delta: ToolCallDelta) -> Self {
        Self::with_delta(
            id,
            model,
            created,
            StreamDelta {
                tool_calls: Some(vec![delta]),
                ..Default::default()
            },
        )
    }

    pub fn finish(id: &str, model: &str, created: u64, reason: &str) -> Self {
        let mut chunk = Self::base(id, model, created);
        chunk.choices.push(StreamChoice {
            index: 0,
            delta: StreamDelta::default(),
            finish_reason: Some(reason.to_string()),
        });
        chunk
    }

    pub fn usage(id: &str, model: &str, created: u64, usage: Usage) -> Self {
        let mut chunk = Self::base(id, model, created);
        chunk.usage = Some(usage);
        chunk
    }

    /// Terminal chunk for a mid-stream failure.
    pub fn terminal_error(id: &str, model: &str, created: u64, message: &str) -> Self {
        let mut chunk = Self::base(id, model, created);
        chunk.error = Some(StreamError {
            message: message.to_string(),
        });
        chunk
    }

    /// Finish reason carried by this chunk, if any.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
    }
}
