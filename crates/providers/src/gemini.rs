//! Google Gemini adapter.
//!
//! Implements the `generateContent` / `streamGenerateContent` wire:
//! `contents`/`parts` message shape, key-in-query authentication, and
//! `functionCall`/`functionResponse` tool calling. Gemini emits complete
//! function calls (no argument streaming) and correlates results by
//! function name rather than call id.

use serde_json::Value;

use cg_domain::conversation::{ContentPart, MessageContent, Role};
use cg_domain::error::{Error, Result};
use cg_domain::model::ProviderKind;
use cg_domain::stream::{BoxStream, ProviderEvent};
use cg_domain::tool::ToolCall;

use crate::sse::sse_response_stream;
use crate::traits::{CompletionDocument, ModelAdapter, NormalizedMessage, NormalizedRequest};
use crate::util::{error_from_response, from_reqwest, http_client};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct GeminiAdapter {
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_ms)?,
        })
    }

    fn url(&self, base_url: &str, model: &str, api_key: &str, stream: bool) -> String {
        if stream {
            format!("{base_url}/v1beta/models/{model}:streamGenerateContent?alt=sse&key={api_key}")
        } else {
            format!("{base_url}/v1beta/models/{model}:generateContent?key={api_key}")
        }
    }

    fn build_body(&self, req: &NormalizedRequest) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in &req.messages {
            if msg.role == Role::System {
                system_parts.push(msg.content.extract_all_text());
                continue;
            }
            contents.push(msg_to_gemini(msg));
        }

        let mut body = serde_json::json!({ "contents": contents });

        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n\n")}],
            });
        }
        if !req.params.tools.is_empty() {
            let decls: Vec<Value> = req
                .params
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": decls}]);
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = req.params.temperature {
            generation_config.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.params.max_tokens {
            generation_config.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_gemini(msg: &NormalizedMessage) -> Value {
    if let Some(result) = &msg.tool_result {
        let response = if result.is_error {
            serde_json::json!({"error": result.content})
        } else {
            serde_json::json!({"content": result.content})
        };
        return serde_json::json!({
            "role": "user",
            "parts": [{
                "functionResponse": {
                    "name": result.tool_name,
                    "response": response,
                }
            }],
        });
    }

    let role = match msg.role {
        Role::Assistant => "model",
        _ => "user",
    };

    let mut parts: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => {
            if !t.is_empty() {
                parts.push(serde_json::json!({"text": t}));
            }
        }
        MessageContent::Parts(content_parts) => {
            for p in content_parts {
                match p {
                    ContentPart::Text { text } => {
                        parts.push(serde_json::json!({"text": text}));
                    }
                    ContentPart::Image { image_url } | ContentPart::ToolImage { image_url } => {
                        parts.push(serde_json::json!({
                            "fileData": {"fileUri": image_url.url},
                        }));
                    }
                }
            }
        }
    }
    for tc in &msg.tool_calls {
        parts.push(serde_json::json!({
            "functionCall": {"name": tc.tool_name, "args": tc.arguments},
        }));
    }

    serde_json::json!({"role": role, "parts": parts})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gemini has no call ids — synthesize one so the tool loop can
/// correlate Start/End events.
fn synthetic_call_id(name: &str) -> String {
    format!("call_{}_{}", name, &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn parse_candidate_parts(body: &Value) -> (String, Vec<ToolCall>, Option<String>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    let candidate = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    if let Some(parts) = candidate
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                tool_calls.push(ToolCall {
                    call_id: synthetic_call_id(&name),
                    tool_name: name,
                    arguments: fc.get("args").cloned().unwrap_or(Value::Null),
                });
            }
        }
    }

    let finish_reason = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(|f| f.as_str())
        .map(String::from);

    (text, tool_calls, finish_reason)
}

fn parse_generate_response(body: &Value) -> Result<CompletionDocument> {
    if body.get("candidates").and_then(|c| c.as_array()).is_none() {
        return Err(Error::UpstreamMalformed(
            "no candidates in generateContent response".into(),
        ));
    }
    let (content, tool_calls, finish_reason) = parse_candidate_parts(body);
    Ok(CompletionDocument {
        content,
        tool_calls,
        model: body
            .get("modelVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason,
    })
}

fn parse_stream_data(data: &str) -> Vec<Result<ProviderEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();
    let (text, tool_calls, finish_reason) = parse_candidate_parts(&v);

    if !text.is_empty() {
        events.push(Ok(ProviderEvent::Token { text }));
    }
    for tc in tool_calls {
        // Complete calls arrive in one chunk — no delta assembly needed.
        events.push(Ok(ProviderEvent::ToolCallStarted {
            call_id: tc.call_id.clone(),
            tool_name: tc.tool_name.clone(),
        }));
        events.push(Ok(ProviderEvent::ToolCallFinished {
            call_id: tc.call_id,
            tool_name: tc.tool_name,
            arguments: tc.arguments,
        }));
    }
    if let Some(reason) = finish_reason {
        events.push(Ok(ProviderEvent::Done {
            finish_reason: Some(reason),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument> {
        let url = self.url(&req.auth.base_url, &req.params.model, &req.auth.api_key, false);
        let body = self.build_body(req);

        tracing::debug!(model = %req.params.model, "gemini generateContent request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_generate_response(&resp_json)
    }

    async fn complete_stream(
        &self,
        req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let url = self.url(&req.auth.base_url, &req.params.model, &req.auth.api_key, true);
        let body = self.build_body(req);

        tracing::debug!(model = %req.params.model, "gemini stream request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        Ok(sse_response_stream(resp, parse_stream_data))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CompletionParams, ProviderAuth};

    #[test]
    fn body_maps_roles_and_system_instruction() {
        let adapter = GeminiAdapter::new(20_000).unwrap();
        let req = NormalizedRequest {
            messages: vec![
                NormalizedMessage::system("Be brief."),
                NormalizedMessage::user("2+2?"),
                NormalizedMessage::plain(
                    Role::Assistant,
                    MessageContent::Text("4".into()),
                ),
            ],
            params: CompletionParams {
                model: "gemini-2.0-flash".into(),
                temperature: Some(0.2),
                max_tokens: None,
                tools: vec![],
            },
            auth: ProviderAuth {
                api_key: "k".into(),
                base_url: "https://generativelanguage.googleapis.com".into(),
            },
        };
        let body = adapter.build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["generationConfig"]["temperature"], serde_json::json!(0.2));
    }

    #[test]
    fn tool_result_correlates_by_name() {
        let msg = NormalizedMessage::tool_result("call_x", "retrieve_documents", "ctx", false);
        let v = msg_to_gemini(&msg);
        assert_eq!(
            v["parts"][0]["functionResponse"]["name"],
            "retrieve_documents"
        );
        assert_eq!(v["parts"][0]["functionResponse"]["response"]["content"], "ctx");
    }

    #[test]
    fn stream_function_call_arrives_complete() {
        let events = parse_stream_data(
            r#"{"candidates":[{"content":{"parts":[
                {"functionCall":{"name":"describe_image","args":{"url":"https://x/i.png"}}}
            ]}}]}"#,
        );
        assert!(matches!(events[0], Ok(ProviderEvent::ToolCallStarted { .. })));
        match &events[1] {
            Ok(ProviderEvent::ToolCallFinished {
                tool_name,
                arguments,
                ..
            }) => {
                assert_eq!(tool_name, "describe_image");
                assert_eq!(arguments["url"], "https://x/i.png");
            }
            other => panic!("expected ToolCallFinished, got {other:?}"),
        }
    }

    #[test]
    fn stream_finish_reason_terminates() {
        let events = parse_stream_data(
            r#"{"candidates":[{"content":{"parts":[{"text":"done"}]},"finishReason":"STOP"}]}"#,
        );
        assert!(matches!(events[0], Ok(ProviderEvent::Token { .. })));
        assert!(matches!(events[1], Ok(ProviderEvent::Done { .. })));
    }

    #[test]
    fn missing_candidates_is_malformed() {
        let err = parse_generate_response(&serde_json::json!({"promptFeedback": {}})).unwrap_err();
        assert!(matches!(err, Error::UpstreamMalformed(_)));
    }
}
