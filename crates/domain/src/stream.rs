//! Streaming event types.
//!
//! Two layers: [`ProviderEvent`] is what an adapter's token stream
//! yields; [`StreamEvent`] is the single multiplexed output sequence the
//! caller consumes. The agent loop translates between them.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-side events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted by a provider adapter's token stream
/// (provider-agnostic; every adapter converts its wire format to this).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// The model began a tool call.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool-call argument data.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Provider stream finished.
    #[serde(rename = "done")]
    Done { finish_reason: Option<String> },

    /// An error occurred mid-stream.
    #[serde(rename = "error")]
    Error { message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Multiplexed output events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of the multiplexed output stream.
///
/// Exactly one `Done` or `Error` terminates every stream; no events are
/// emitted after termination. Consumers must tolerate unknown `type`
/// values for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text-delta")]
    TextDelta { text: String },

    #[serde(rename = "tool-start")]
    ToolStart {
        name: String,
        args: serde_json::Value,
    },

    #[serde(rename = "tool-end")]
    ToolEnd {
        name: String,
        output: serde_json::Value,
    },

    #[serde(rename = "tool-error")]
    ToolError { name: String, error: String },

    #[serde(rename = "done")]
    Done,

    #[serde(rename = "error")]
    Error { message: String },
}

impl StreamEvent {
    /// Terminal events end the stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    /// Tool lifecycle events ride the out-of-band `tool` wire channel.
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            StreamEvent::ToolStart { .. }
                | StreamEvent::ToolEnd { .. }
                | StreamEvent::ToolError { .. }
        )
    }
}
