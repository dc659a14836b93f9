//! AWS Bedrock adapter.
//!
//! Rides Bedrock's OpenAI-compatible runtime gateway
//! (`{base_url}/openai/v1/chat/completions`) with a bearer API key, so
//! the wire handling is shared with the OpenAI-compatible adapter. IAM
//! credential exchange stays outside the gateway; the credential store
//! supplies the derived bearer key like any other provider secret.

use serde_json::Value;

use cg_domain::error::Result;
use cg_domain::model::ProviderKind;
use cg_domain::stream::{BoxStream, ProviderEvent};

use crate::openai_compat::{msg_to_openai, parse_chat_response, tool_to_openai, OpenAiStreamState};
use crate::sse::sse_response_stream;
use crate::traits::{CompletionDocument, ModelAdapter, NormalizedRequest};
use crate::util::{error_from_response, from_reqwest, http_client};

#[derive(Debug)]
pub struct BedrockAdapter {
    client: reqwest::Client,
}

impl BedrockAdapter {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_ms)?,
        })
    }

    fn chat_url(&self, base_url: &str) -> String {
        format!("{base_url}/openai/v1/chat/completions")
    }

    fn build_body(&self, req: &NormalizedRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = serde_json::json!({
            "model": req.params.model,
            "messages": messages,
            "stream": stream,
        });
        if !req.params.tools.is_empty() {
            let tools: Vec<Value> = req.params.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.params.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.params.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl ModelAdapter for BedrockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument> {
        let url = self.chat_url(&req.auth.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(model = %req.params.model, "bedrock completion request");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", req.auth.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_chat_response(&resp_json)
    }

    async fn complete_stream(
        &self,
        req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let url = self.chat_url(&req.auth.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(model = %req.params.model, "bedrock stream request");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", req.auth.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let mut state = OpenAiStreamState::default();
        Ok(sse_response_stream(resp, move |data| state.parse(data)))
    }
}
