//! In-process model adapter.
//!
//! No network boundary: completions come from an injected
//! [`LocalModelHandle`]. The failure surface is restricted to
//! model-not-loaded and out-of-memory, both mapped to
//! [`Error::UpstreamRejected`] for uniformity with remote adapters.

use std::sync::Arc;

use parking_lot::RwLock;

use cg_domain::conversation::Role;
use cg_domain::error::{Error, Result};
use cg_domain::model::ProviderKind;
use cg_domain::stream::{BoxStream, ProviderEvent};

use crate::traits::{CompletionDocument, ModelAdapter, NormalizedMessage, NormalizedRequest};

/// Failure modes of an in-process model.
#[derive(Debug)]
pub enum LocalModelError {
    NotLoaded,
    OutOfMemory(String),
}

/// An in-process text generation engine. Implementations wrap whatever
/// runtime the deployment ships (quantized llama.cpp build, ONNX
/// session, test stub).
#[async_trait::async_trait]
pub trait LocalModelHandle: Send + Sync {
    fn model_id(&self) -> &str;
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LocalModelError>;
}

pub struct LocalAdapter {
    handle: RwLock<Option<Arc<dyn LocalModelHandle>>>,
}

impl std::fmt::Debug for LocalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded = self.handle.read().is_some();
        f.debug_struct("LocalAdapter")
            .field("loaded", &loaded)
            .finish()
    }
}

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAdapter {
    /// Create the adapter with no model loaded. Requests fail with a
    /// provider rejection until [`attach`](Self::attach) is called.
    pub fn new() -> Self {
        Self {
            handle: RwLock::new(None),
        }
    }

    pub fn with_handle(handle: Arc<dyn LocalModelHandle>) -> Self {
        Self {
            handle: RwLock::new(Some(handle)),
        }
    }

    /// Attach (or swap) the loaded model.
    pub fn attach(&self, handle: Arc<dyn LocalModelHandle>) {
        tracing::info!(model = handle.model_id(), "local model attached");
        *self.handle.write() = Some(handle);
    }

    fn current(&self) -> Result<Arc<dyn LocalModelHandle>> {
        self.handle
            .read()
            .clone()
            .ok_or_else(|| map_local_error(LocalModelError::NotLoaded))
    }
}

fn map_local_error(e: LocalModelError) -> Error {
    match e {
        LocalModelError::NotLoaded => Error::UpstreamRejected {
            status: 503,
            message: "local model is not loaded".into(),
        },
        LocalModelError::OutOfMemory(detail) => Error::UpstreamRejected {
            status: 500,
            message: format!("local model out of memory: {detail}"),
        },
    }
}

/// Flatten the normalized history into a single plain-text prompt.
fn render_prompt(messages: &[NormalizedMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let tag = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let text = match &msg.tool_result {
            Some(result) => result.content.clone(),
            None => msg.content.extract_all_text(),
        };
        if !text.is_empty() {
            prompt.push_str(tag);
            prompt.push_str(": ");
            prompt.push_str(&text);
            prompt.push('\n');
        }
    }
    prompt.push_str("assistant: ");
    prompt
}

#[async_trait::async_trait]
impl ModelAdapter for LocalAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument> {
        let handle = self.current()?;
        let prompt = render_prompt(&req.messages);
        let content = handle.generate(&prompt).await.map_err(map_local_error)?;
        Ok(CompletionDocument {
            content,
            tool_calls: Vec::new(),
            model: handle.model_id().to_string(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn complete_stream(
        &self,
        req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let handle = self.current()?;
        let prompt = render_prompt(&req.messages);

        let stream = async_stream::stream! {
            match handle.generate(&prompt).await {
                Ok(text) => {
                    // The handle generates in one pass; re-chunk so the
                    // consumer sees incremental delivery.
                    for chunk in chunk_text(&text, 24) {
                        yield Ok(ProviderEvent::Token { text: chunk });
                    }
                    yield Ok(ProviderEvent::Done {
                        finish_reason: Some("stop".into()),
                    });
                }
                Err(e) => {
                    yield Err(map_local_error(e));
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Split text into chunks of at most `size` bytes on char boundaries.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if current.len() >= size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
