//! OpenAI-compatible adapter.
//!
//! One wire format serves several provider keys: OpenAI itself, Azure
//! (different URL layout and auth header), SambaNova, self-hosted
//! vision/LLM servers, and any generic OpenAI-compatible endpoint. The
//! registry registers one instance per provider key.

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

const AZURE_API_VERSION: &str = "2024-10-21";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapter for any endpoint following the OpenAI chat completions
/// contract.
///
/// Azure uses the same wire format with a different URL pattern
/// (`/openai/deployments/{deployment}/chat/completions`) and auth header
/// (`api-key` instead of `Authorization: Bearer`).
#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    kind: ProviderKind,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(kind: ProviderKind, timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            kind,
            client: http_client(timeout_ms)?,
        })
    }

    fn is_azure(&self) -> bool {
        self.kind == ProviderKind::Azure
    }

    /// Azure catalog ids carry an `azure/` prefix; the remainder is the
    /// deployment name embedded in the URL.
    fn deployment<'a>(&self, model: &'a str) -> &'a str {
        model.strip_prefix("azure/").unwrap_or(model)
    }

    fn chat_url(&self, base_url: &str, model: &str) -> String {
        if self.is_azure() {
            format!(
                "{base_url}/openai/deployments/{}/chat/completions?api-version={AZURE_API_VERSION}",
                self.deployment(model)
            )
        } else {
            format!("{base_url}/chat/completions")
        }
    }

    fn authed_post(&self, url: &str, api_key: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).header("Content-Type", "application/json");
        if self.is_azure() {
            builder.header("api-key", api_key)
        } else {
            builder.header("Authorization", format!("Bearer {api_key}"))
        }
    }

    fn build_body(&self, req: &NormalizedRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": stream,
        });

        // Azure embeds the deployment name in the URL; standard OpenAI
        // requires the model in the body.
        if !self.is_azure() {
            body["model"] = Value::String(req.params.model.clone());
        }
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

pub(crate) fn msg_to_openai(msg: &NormalizedMessage) -> Value {
    if let Some(result) = &msg.tool_result {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": result.call_id,
            "content": result.content,
        });
    }

    if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
        let text = msg.content.extract_all_text();
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.call_id,
                    "type": "function",
                    "function": {
                        "name": tc.tool_name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        let mut obj = serde_json::json!({"role": "assistant", "tool_calls": calls});
        obj["content"] = if text.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        };
        return obj;
    }

    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": t,
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => serde_json::json!({
                        "type": "text",
                        "text": text,
                    }),
                    ContentPart::Image { image_url } | ContentPart::ToolImage { image_url } => {
                        serde_json::json!({
                            "type": "image_url",
                            "image_url": { "url": image_url.url },
                        })
                    }
                })
                .collect();
            serde_json::json!({
                "role": role_to_str(msg.role),
                "content": content,
            })
        }
    }
}

pub(crate) fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_chat_response(body: &Value) -> Result<CompletionDocument> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::UpstreamMalformed("no choices in completion response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::UpstreamMalformed("no message in completion choice".into()))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(CompletionDocument {
        content,
        tool_calls: parse_tool_calls(message),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable parser state: OpenAI sends the call id only on the first
/// chunk of each tool call; later argument chunks carry the index alone.
#[derive(Default)]
pub(crate) struct OpenAiStreamState {
    call_ids_by_index: HashMap<u64, String>,
}

impl OpenAiStreamState {
    pub(crate) fn parse(&mut self, data: &str) -> Vec<Result<ProviderEvent>> {
        if data.trim() == "[DONE]" {
            return vec![Ok(ProviderEvent::Done {
                finish_reason: Some("stop".into()),
            })];
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            // Keep-alive or usage-only chunk.
            return Vec::new();
        };

        let mut events = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    self.call_ids_by_index.insert(index, id.to_string());
                    events.push(Ok(ProviderEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                }

                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !args.is_empty() {
                        let call_id = self
                            .call_ids_by_index
                            .get(&index)
                            .cloned()
                            .unwrap_or_else(|| index.to_string());
                        events.push(Ok(ProviderEvent::ToolCallDelta {
                            call_id,
                            delta: args.to_string(),
                        }));
                    }
                }
            }
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(ProviderEvent::Token {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            events.push(Ok(ProviderEvent::Done {
                finish_reason: Some(fr.to_string()),
            }));
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelAdapter for OpenAiCompatAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument> {
        let url = self.chat_url(&req.auth.base_url, &req.params.model);
        let body = self.build_body(req, false);

        tracing::debug!(provider = %self.kind, url = %url, "chat completion request");

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
        parse_chat_response(&resp_json)
    }

    async fn complete_stream(
        &self,
        req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let url = self.chat_url(&req.auth.base_url, &req.params.model);
        let body = self.build_body(req, true);

        tracing::debug!(provider = %self.kind, url = %url, "chat stream request");

        let resp = self
            .authed_post(&url, &req.auth.api_key)
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CompletionParams, ProviderAuth};

    fn request(kind_model: &str, temperature: Option<f32>) -> NormalizedRequest {
        NormalizedRequest {
            messages: vec![NormalizedMessage::user("2+2?")],
            params: CompletionParams {
                model: kind_model.into(),
                temperature,
                max_tokens: None,
                tools: vec![],
            },
            auth: ProviderAuth {
                api_key: "sk-test".into(),
                base_url: "https://api.openai.com/v1".into(),
            },
        }
    }

    #[test]
    fn body_omits_unset_temperature() {
        let adapter = OpenAiCompatAdapter::new(ProviderKind::OpenAi, 20_000).unwrap();
        let body = adapter.build_body(&request("o3-mini", None), false);
        assert!(body.get("temperature").is_none());

        let body = adapter.build_body(&request("gpt-4o-mini", Some(0.3)), false);
        assert_eq!(body["temperature"], serde_json::json!(0.3));
    }

    #[test]
    fn azure_url_embeds_deployment_and_omits_model_from_body() {
        let adapter = OpenAiCompatAdapter::new(ProviderKind::Azure, 20_000).unwrap();
        let url = adapter.chat_url("https://my-rg.openai.azure.com", "azure/gpt-4o");
        assert!(url.contains("/openai/deployments/gpt-4o/chat/completions"));

        let body = adapter.build_body(&request("azure/gpt-4o", None), false);
        assert!(body.get("model").is_none());
    }

    #[test]
    fn tool_result_message_shape() {
        let msg =
            NormalizedMessage::tool_result("call_7", "retrieve_documents", "{\"contexts\":[]}", false);
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_7");
    }

    #[test]
    fn assistant_with_calls_serializes_arguments_as_string() {
        let msg = NormalizedMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                call_id: "call_1".into(),
                tool_name: "retrieve_documents".into(),
                arguments: serde_json::json!({"query": "svd"}),
            }],
        );
        let v = msg_to_openai(&msg);
        assert_eq!(v["content"], Value::Null);
        assert_eq!(v["tool_calls"][0]["function"]["name"], "retrieve_documents");
        assert_eq!(
            v["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"svd\"}"
        );
    }

    #[test]
    fn multipart_user_message_keeps_images() {
        use cg_domain::conversation::ImageRef;
        let msg = NormalizedMessage::plain(
            Role::User,
            MessageContent::Parts(vec![
                ContentPart::Text { text: "what is this?".into() },
                ContentPart::Image {
                    image_url: ImageRef { url: "https://x/i.png".into() },
                },
            ]),
        );
        let v = msg_to_openai(&msg);
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["type"], "image_url");
        assert_eq!(v["content"][1]["image_url"]["url"], "https://x/i.png");
    }

    #[test]
    fn stream_parser_emits_tokens_and_done() {
        let mut state = OpenAiStreamState::default();
        let events =
            state.parse(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#);
        assert!(matches!(
            events[0],
            Ok(ProviderEvent::Token { ref text }) if text == "Hel"
        ));

        let events = state.parse("[DONE]");
        assert!(matches!(events[0], Ok(ProviderEvent::Done { .. })));
    }

    #[test]
    fn stream_parser_assembles_tool_call_ids_across_chunks() {
        let mut state = OpenAiStreamState::default();

        let first = state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9",
                "function":{"name":"retrieve_documents","arguments":""}}]}}]}"#,
        );
        assert!(matches!(
            first[0],
            Ok(ProviderEvent::ToolCallStarted { ref call_id, .. }) if call_id == "call_9"
        ));

        // Later chunks carry only the index — the state maps it back.
        let second = state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,
                "function":{"arguments":"{\"query\":"}}]}}]}"#,
        );
        assert!(matches!(
            second[0],
            Ok(ProviderEvent::ToolCallDelta { ref call_id, .. }) if call_id == "call_9"
        ));
    }

    #[test]
    fn stream_parser_finish_reason_terminates() {
        let mut state = OpenAiStreamState::default();
        let events = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        assert!(matches!(
            events[0],
            Ok(ProviderEvent::Done { finish_reason: Some(ref r) }) if r == "tool_calls"
        ));
    }

    #[test]
    fn single_shot_response_parses() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"content": "4"}, "finish_reason": "stop"}]
        });
        let doc = parse_chat_response(&body).unwrap();
        assert_eq!(doc.content, "4");
        assert_eq!(doc.finish_reason.as_deref(), Some("stop"));
        assert!(doc.tool_calls.is_empty());
    }

    #[test]
    fn missing_choices_is_malformed() {
        let err = parse_chat_response(&serde_json::json!({"model": "x"})).unwrap_err();
        assert!(matches!(err, Error::UpstreamMalformed(_)));
    }
}
