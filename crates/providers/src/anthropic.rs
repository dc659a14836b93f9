//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including tool use and
//! streaming. System messages go in a separate top-level `system` field,
//! and tool results travel as user messages with `tool_result` content
//! blocks.

use std::collections::HashMap;

use serde_json::Value;

use cg_domain::conversation::{ContentPart, MessageContent, Role};
use cg_domain::error::{Error, Result};
use cg_domain::model::ProviderKind;
use cg_domain::stream::{BoxStream, ProviderEvent};
use cg_domain::tool::{ToolCall, ToolDefinition};

use crate::sse::sse_response_stream;
use crate::traits::{CompletionDocument, ModelAdapter, NormalizedMessage, NormalizedRequest};
use crate::util::{error_from_response, from_reqwest, http_client};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4_096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_ms)?,
        })
    }

    fn authed_post(&self, url: &str, api_key: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &NormalizedRequest, stream: bool) -> Value {
        // System messages lift into the top-level `system` field.
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            if msg.role == Role::System {
                system_parts.push(msg.content.extract_all_text());
                continue;
            }
            api_messages.push(msg_to_anthropic(msg));
        }

        let mut body = serde_json::json!({
            "model": req.params.model,
            "messages": api_messages,
            "max_tokens": req.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.params.tools.is_empty() {
            let tools: Vec<Value> = req.params.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.params.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_anthropic(msg: &NormalizedMessage) -> Value {
    // Tool results are user messages with tool_result content blocks.
    if let Some(result) = &msg.tool_result {
        return serde_json::json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": result.call_id,
                "content": result.content,
                "is_error": result.is_error,
            }],
        });
    }

    if msg.role == Role::Assistant {
        let mut blocks: Vec<Value> = Vec::new();
        let text = msg.content.extract_all_text();
        if !text.is_empty() {
            blocks.push(serde_json::json!({"type": "text", "text": text}));
        }
        for tc in &msg.tool_calls {
            blocks.push(serde_json::json!({
                "type": "tool_use",
                "id": tc.call_id,
                "name": tc.tool_name,
                "input": tc.arguments,
            }));
        }
        return serde_json::json!({"role": "assistant", "content": blocks});
    }

    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "user", "content": t}),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    ContentPart::Image { image_url } | ContentPart::ToolImage { image_url } => {
                        serde_json::json!({
                            "type": "image",
                            "source": {"type": "url", "url": image_url.url},
                        })
                    }
                })
                .collect();
            serde_json::json!({"role": "user", "content": content})
        }
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_messages_response(body: &Value) -> Result<CompletionDocument> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::UpstreamMalformed("no content in messages response".into()))?;

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                let call_id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if call_id.is_empty() {
                    continue;
                }
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
    }

    Ok(CompletionDocument {
        content: text_parts.join(""),
        tool_calls,
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ToolBlock {
    call_id: String,
    name: String,
    args_buf: String,
}

/// Mutable assembly state for Anthropic's block-indexed stream: tool-use
/// blocks open with `content_block_start`, accumulate
/// `input_json_delta` payloads, and close with `content_block_stop`.
#[derive(Default)]
struct AnthropicStreamState {
    tool_blocks: HashMap<u64, ToolBlock>,
    done_emitted: bool,
}

impl AnthropicStreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<ProviderEvent>> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        match v.get("type").and_then(|t| t.as_str()) {
            Some("content_block_start") => {
                let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let block = v.get("content_block").unwrap_or(&Value::Null);
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let call_id = block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string();
                    self.tool_blocks.insert(
                        index,
                        ToolBlock {
                            call_id: call_id.clone(),
                            name: name.clone(),
                            args_buf: String::new(),
                        },
                    );
                    return vec![Ok(ProviderEvent::ToolCallStarted {
                        call_id,
                        tool_name: name,
                    })];
                }
                Vec::new()
            }
            Some("content_block_delta") => {
                let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let delta = v.get("delta").unwrap_or(&Value::Null);
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        let text = delta
                            .get("text")
                            .and_then(|t| t.as_str())
                            .unwrap_or_default();
                        if text.is_empty() {
                            Vec::new()
                        } else {
                            vec![Ok(ProviderEvent::Token { text: text.into() })]
                        }
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .get("partial_json")
                            .and_then(|p| p.as_str())
                            .unwrap_or_default();
                        if let Some(block) = self.tool_blocks.get_mut(&index) {
                            block.args_buf.push_str(partial);
                            return vec![Ok(ProviderEvent::ToolCallDelta {
                                call_id: block.call_id.clone(),
                                delta: partial.to_string(),
                            })];
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            Some("content_block_stop") => {
                let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(block) = self.tool_blocks.remove(&index) {
                    let arguments = if block.args_buf.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&block.args_buf)
                            .unwrap_or(Value::Object(Default::default()))
                    };
                    return vec![Ok(ProviderEvent::ToolCallFinished {
                        call_id: block.call_id,
                        tool_name: block.name,
                        arguments,
                    })];
                }
                Vec::new()
            }
            Some("message_delta") => {
                if let Some(reason) = v
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|r| r.as_str())
                {
                    self.done_emitted = true;
                    return vec![Ok(ProviderEvent::Done {
                        finish_reason: Some(reason.to_string()),
                    })];
                }
                Vec::new()
            }
            Some("message_stop") => {
                if self.done_emitted {
                    Vec::new()
                } else {
                    self.done_emitted = true;
                    vec![Ok(ProviderEvent::Done {
                        finish_reason: Some("end_turn".into()),
                    })]
                }
            }
            Some("error") => {
                let message = v
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown streaming error")
                    .to_string();
                vec![Ok(ProviderEvent::Error { message })]
            }
            // ping / message_start / unknown event types.
            _ => Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument> {
        let url = format!("{}/v1/messages", req.auth.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(url = %url, "anthropic messages request");

        let resp = self
            .authed_post(&url, &req.auth.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_messages_response(&resp_json)
    }

    async fn complete_stream(
        &self,
        req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let url = format!("{}/v1/messages", req.auth.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(url = %url, "anthropic stream request");

        let resp = self
            .authed_post(&url, &req.auth.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let mut state = AnthropicStreamState::default();
        Ok(sse_response_stream(resp, move |data| state.parse(data)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
