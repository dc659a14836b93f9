//! Conversation data model shared by the dispatcher, the agent loop, and
//! the merge engine.
//!
//! Wire names are camelCase to match the inbound web contract. A
//! conversation owns its message sequence; tool invocations are owned by
//! the message they are attached to and never shared across messages.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A full conversation record.
///
/// Message order is arrival/edit order, not necessarily timestamp order.
/// Message ids are unique within a conversation, and at most one message
/// (always the last) is in-flight at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Sampling temperature, domain [0, 1].
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub user_id: String,
    /// Project/course namespace the conversation belongs to.
    #[serde(default)]
    pub course_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn d_temperature() -> f32 {
    0.4
}

impl Conversation {
    /// The last user message, if any.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a conversation.
///
/// Content text is immutable once persisted, except that the *last*
/// message of a conversation may be replaced wholesale during streaming
/// (progressive token accumulation) until finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    /// The system prompt frozen at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_system_message: Option<String>,
    /// The fully-expanded (retrieval-augmented) prompt actually sent.
    /// Kept for re-transmission and audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_prompt_engineered_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<MessageFeedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFeedback {
    pub is_positive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageRef },
    /// Image produced by a tool (e.g. a generated chart), kept distinct
    /// so the UI can attribute it.
    #[serde(rename = "tool_image_url")]
    ToolImage { image_url: ImageRef },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            latest_system_message: None,
            final_prompt_engineered_message: None,
            tool_invocations: Vec::new(),
            feedback: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl MessageContent {
    /// First plain-text segment, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// All text segments joined, images ignored.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether any part references an image.
    pub fn has_images(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::Image { .. } | ContentPart::ToolImage { .. })),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool invocations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single tool call's arguments plus its eventual result or error,
/// attached to the message that requested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Opaque correlation id. Records with an empty id are inert and
    /// must be ignored by every consumer.
    #[serde(default)]
    pub invocation_id: String,
    pub name: String,
    #[serde(default)]
    pub argument_values: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Success payload of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    ImageUrls(Vec<String>),
    Data(serde_json::Value),
}

impl ToolInvocation {
    /// Inert records lack a correlation id and are skipped everywhere.
    pub fn is_inert(&self) -> bool {
        self.invocation_id.is_empty()
    }

    /// Pending = neither output nor error yet. Never surfaced to the
    /// model as a completed call.
    pub fn is_pending(&self) -> bool {
        self.output.is_none() && self.error.is_none()
    }

    /// Render the completed result for inclusion in model context.
    /// Errors are folded in as `"Error: <message>"` so the model can
    /// react.
    pub fn context_text(&self) -> Option<String> {
        if self.is_inert() || self.is_pending() {
            return None;
        }
        if let Some(err) = &self.error {
            return Some(format!("Error: {err}"));
        }
        match self.output.as_ref() {
            Some(ToolOutput::Text(t)) => Some(t.clone()),
            Some(ToolOutput::ImageUrls(urls)) => Some(urls.join("\n")),
            Some(ToolOutput::Data(v)) => Some(v.to_string()),
            None => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incremental edits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A partial conversation update: changed metadata plus a suffix of
/// new/replaced messages, sent instead of the full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDelta {
    pub id: String,
    #[serde(default)]
    pub conversation_meta: ConversationMeta,
    #[serde(default)]
    pub messages_delta: Vec<Message>,
    /// Anchor for edit truncation: everything at and after this message
    /// id in the stored history is discarded before the delta is
    /// appended. Absent ⇒ pure append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_edited_message_id: Option<String>,
}

/// Metadata fields a delta may overwrite on the stored conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationMeta {
    pub name: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub folder_id: Option<String>,
}

/// Inbound payload of a conversation sync: either the complete history
/// or a delta against stored state.
///
/// Untagged: a full conversation always carries `model`, a delta never
/// does at top level, so the first matching variant is unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncomingConversation {
    Full(Conversation),
    Delta(ConversationDelta),
}
