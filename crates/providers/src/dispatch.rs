//! Request dispatcher.
//!
//! Validates an inbound chat request, resolves the model through the
//! registry, loads and lazily decrypts provider credentials, normalizes
//! the conversation into the adapter-facing shape, and invokes the
//! adapter in stream or single-shot mode.

use std::sync::Arc;

use cg_domain::conversation::{ContentPart, Conversation, MessageContent, Role};
use cg_domain::error::{Error, Result};
use cg_domain::model::ModelDescriptor;
use cg_domain::stream::{BoxStream, ProviderEvent};
use cg_domain::tool::ToolDefinition;

use crate::credentials::CredentialStore;
use crate::registry::ModelRegistry;
use crate::traits::{
    CompletionDocument, CompletionParams, ModelAdapter, NormalizedMessage, NormalizedRequest,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One inbound chat request, as handed to the dispatcher.
pub struct ChatDispatch {
    pub conversation: Conversation,
    pub model_id: String,
    pub course_name: String,
    pub stream: bool,
    pub tools: Vec<ToolDefinition>,
}

pub enum DispatchOutcome {
    Stream(BoxStream<'static, Result<ProviderEvent>>),
    Document(CompletionDocument),
}

impl std::fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
            DispatchOutcome::Document(_) => f.debug_tuple("Document").finish_non_exhaustive(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    credentials: Arc<dyn CredentialStore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelRegistry>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            registry,
            credentials,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Validate and dispatch one request end to end.
    pub async fn dispatch(&self, req: ChatDispatch) -> Result<DispatchOutcome> {
        if req.conversation.messages.is_empty() {
            return Err(Error::Validation("conversation has no messages".into()));
        }
        if req.model_id.is_empty() {
            return Err(Error::Validation("no model specified".into()));
        }

        // Resolve before touching credentials or the network — an
        // unknown model must fail without any adapter involvement.
        let (_, descriptor) = self.registry.resolve(&req.course_name, &req.model_id)?;

        let messages = normalize_conversation(&req.conversation, &descriptor);
        let temperature = Some(req.conversation.temperature);

        if req.stream {
            let stream = self
                .complete_stream(&req.course_name, &req.model_id, messages, req.tools, temperature)
                .await?;
            Ok(DispatchOutcome::Stream(stream))
        } else {
            let doc = self
                .complete(&req.course_name, &req.model_id, messages, req.tools, temperature)
                .await?;
            Ok(DispatchOutcome::Document(doc))
        }
    }

    /// Single-shot completion over already-normalized messages.
    pub async fn complete(
        &self,
        course_name: &str,
        model_id: &str,
        messages: Vec<NormalizedMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
    ) -> Result<CompletionDocument> {
        let (adapter, request) = self
            .prepare(course_name, model_id, messages, tools, temperature)
            .await?;
        adapter.complete(&request).await
    }

    /// Streaming completion over already-normalized messages. The agent
    /// loop calls this once per model turn.
    pub async fn complete_stream(
        &self,
        course_name: &str,
        model_id: &str,
        messages: Vec<NormalizedMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let (adapter, request) = self
            .prepare(course_name, model_id, messages, tools, temperature)
            .await?;
        adapter.complete_stream(&request).await
    }

    /// Resolve the model, gate optional parameters against the
    /// descriptor, and fetch just-decrypted credentials.
    async fn prepare(
        &self,
        course_name: &str,
        model_id: &str,
        messages: Vec<NormalizedMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
    ) -> Result<(Arc<dyn ModelAdapter>, NormalizedRequest)> {
        let (adapter, descriptor) = self.registry.resolve(course_name, model_id)?;

        // Providers differ in strictness about unsupported parameters;
        // the contract favors graceful degradation — drop, don't fail.
        let temperature = if descriptor.supports_temperature {
            temperature.map(|t| t.clamp(0.0, 1.0))
        } else {
            None
        };
        let tools = if descriptor.supports_tools {
            tools
        } else {
            Vec::new()
        };

        let auth = self
            .credentials
            .provider_auth(course_name, descriptor.provider)
            .await?
            .ok_or_else(|| Error::MissingCredentials(descriptor.provider.to_string()))?;

        tracing::debug!(
            course = %course_name,
            model = %model_id,
            provider = %descriptor.provider,
            "dispatching to adapter"
        );

        let request = NormalizedRequest {
            messages,
            params: CompletionParams {
                model: descriptor.id.clone(),
                temperature,
                max_tokens: None,
                tools,
            },
            auth,
        };
        Ok((adapter, request))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize a stored conversation into adapter-facing messages.
///
/// Two provider-agnostic rules, applied identically for every adapter:
/// - the *last* user message's `final_prompt_engineered_message`
///   (retrieval-augmented prompt) substitutes for its raw text, so
///   augmentation never depends on the provider;
/// - multi-part content collapses to plain text when the model cannot
///   accept images.
pub fn normalize_conversation(
    conversation: &Conversation,
    descriptor: &ModelDescriptor,
) -> Vec<NormalizedMessage> {
    let mut out = Vec::new();

    if !conversation.system_prompt.is_empty() {
        out.push(NormalizedMessage::system(&conversation.system_prompt));
    }

    let last_user_idx = conversation
        .messages
        .iter()
        .rposition(|m| m.role == Role::User);

    for (idx, msg) in conversation.messages.iter().enumerate() {
        let mut content = msg.content.clone();

        if Some(idx) == last_user_idx {
            if let Some(engineered) = &msg.final_prompt_engineered_message {
                content = substitute_text(content, engineered);
            }
        }

        if !descriptor.supports_vision && content.has_images() {
            content = MessageContent::Text(content.extract_all_text());
        }

        out.push(NormalizedMessage::plain(msg.role, content));
    }

    out
}

/// Replace the text of a message with the engineered prompt, keeping
/// image parts in place.
fn substitute_text(content: MessageContent, engineered: &str) -> MessageContent {
    match content {
        MessageContent::Text(_) => MessageContent::Text(engineered.to_string()),
        MessageContent::Parts(parts) => {
            let mut new_parts = vec![ContentPart::Text {
                text: engineered.to_string(),
            }];
            new_parts.extend(
                parts
                    .into_iter()
                    .filter(|p| !matches!(p, ContentPart::Text { .. })),
            );
            MessageContent::Parts(new_parts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::conversation::{ImageRef, Message};
    use cg_domain::model::{ModelDescriptor, ProviderKind};

    fn vision_descriptor() -> ModelDescriptor {
        ModelDescriptor::new("gpt-4o-mini", ProviderKind::OpenAi, 128_000).vision()
    }

    fn conversation(messages: Vec<Message>) -> Conversation {
        Conversation {
            id: "c1".into(),
            name: "test".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: "You are a course assistant.".into(),
            temperature: 0.4,
            user_id: "u1".into(),
            course_name: "CS101".into(),
            folder_id: None,
            messages,
        }
    }

    #[test]
    fn engineered_prompt_substitutes_last_user_only() {
        let mut first = Message::user("first question").with_id("m1");
        first.final_prompt_engineered_message = Some("OLD ENGINEERED".into());
        let reply = Message::assistant("answer").with_id("m2");
        let mut last = Message::user("raw question").with_id("m3");
        last.final_prompt_engineered_message =
            Some("Context: [doc 1]\n\nraw question".into());

        let conv = conversation(vec![first, reply, last]);
        let normalized = normalize_conversation(&conv, &vision_descriptor());

        // system + 3 messages
        assert_eq!(normalized.len(), 4);
        assert_eq!(normalized[0].role, Role::System);
        // Earlier user message keeps its raw text.
        assert_eq!(normalized[1].content.extract_all_text(), "first question");
        // The last user message carries the engineered variant.
        assert_eq!(
            normalized[3].content.extract_all_text(),
            "Context: [doc 1]\n\nraw question"
        );
    }

    #[test]
    fn substitution_preserves_image_parts() {
        let mut msg = Message::new(
            Role::User,
            MessageContent::Parts(vec![
                ContentPart::Text { text: "what is in this image?".into() },
                ContentPart::Image {
                    image_url: ImageRef { url: "https://x/i.png".into() },
                },
            ]),
        );
        msg.final_prompt_engineered_message = Some("augmented question".into());

        let conv = conversation(vec![msg]);
        let normalized = normalize_conversation(&conv, &vision_descriptor());

        match &normalized[1].content {
            MessageContent::Parts(parts) => {
                assert!(
                    matches!(&parts[0], ContentPart::Text { text } if text == "augmented question")
                );
                assert!(matches!(&parts[1], ContentPart::Image { .. }));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn non_vision_model_collapses_parts_to_text() {
        let msg = Message::new(
            Role::User,
            MessageContent::Parts(vec![
                ContentPart::Text { text: "describe".into() },
                ContentPart::Image {
                    image_url: ImageRef { url: "https://x/i.png".into() },
                },
            ]),
        );
        let conv = conversation(vec![msg]);
        let text_only = ModelDescriptor::new("qwen2.5-14b-instruct", ProviderKind::SelfHosted, 32_768);

        let normalized = normalize_conversation(&conv, &text_only);
        assert!(matches!(&normalized[1].content, MessageContent::Text(t) if t == "describe"));
    }

    #[test]
    fn empty_system_prompt_emits_no_system_message() {
        let mut conv = conversation(vec![Message::user("hi")]);
        conv.system_prompt = String::new();
        let normalized = normalize_conversation(&conv, &vision_descriptor());
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].role, Role::User);
    }
}
