use cg_domain::conversation::{MessageContent, Role};
use cg_domain::error::Result;
use cg_domain::model::ProviderKind;
use cg_domain::stream::{BoxStream, ProviderEvent};
use cg_domain::tool::{ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message in the adapter-facing normalized shape.
///
/// Produced from the stored conversation by the dispatcher's
/// normalization pass and extended by the agent loop with tool-exchange
/// messages between turns.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Tool calls requested by this assistant turn (history replay).
    pub tool_calls: Vec<ToolCall>,
    /// Present when `role` is `Tool`: the completed call this message
    /// answers.
    pub tool_result: Option<ToolResultRef>,
}

#[derive(Debug, Clone)]
pub struct ToolResultRef {
    pub call_id: String,
    /// Some providers (Gemini) correlate results by name, not id.
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl NormalizedMessage {
    pub fn plain(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, MessageContent::Text(text.into()))
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, MessageContent::Text(text.into()))
    }

    /// Assistant turn that requested tool calls (with optional lead text).
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_calls: calls,
            tool_result: None,
        }
    }

    /// Completed tool result fed back to the model.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(String::new()),
            tool_calls: Vec::new(),
            tool_result: Some(ToolResultRef {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                content: content.into(),
                is_error,
            }),
        }
    }
}

/// Per-call sampling and tool parameters. The dispatcher gates optional
/// parameters against the model descriptor before building this, so an
/// adapter never has to drop anything itself.
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub model: String,
    /// Already capability-gated: `None` means "do not attach".
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
}

/// Just-decrypted provider credentials for one call. Never cached, never
/// logged.
#[derive(Clone)]
pub struct ProviderAuth {
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for ProviderAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAuth")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// One fully-prepared adapter call.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub messages: Vec<NormalizedMessage>,
    pub params: CompletionParams,
    pub auth: ProviderAuth,
}

/// A non-streaming completion.
#[derive(Debug, Clone)]
pub struct CompletionDocument {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every provider adapter implements.
///
/// Implementations translate between the normalized types above and one
/// backend's wire format. Adapters are stateless with respect to
/// credentials — auth arrives per call and is dropped with the request.
#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync + std::fmt::Debug {
    /// The provider key this adapter is registered under.
    fn kind(&self) -> ProviderKind;

    /// Single-shot completion.
    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument>;

    /// Streaming completion.
    async fn complete_stream(
        &self,
        req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>>;
}
