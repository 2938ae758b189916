//! Protocol Surface
//!
//! Wire types for requests, responses and streaming chunks, plus the
//! bridge from backend events to protocol chunks.

pub mod bridge;
pub mod completion;
pub mod streaming;

pub use bridge::StreamBridge;
pub use completion::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, Message, MessageContent, ModelEntry,
    ModelList, ReasoningEffort, ToolCall, Usage,
};
pub use streaming::{StreamChunk, StreamDelta};
