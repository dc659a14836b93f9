//! End-to-end API tests over the axum router with stub adapters — no
//! network, no real providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use cg_conversations::{ConversationLockMap, MemoryStore};
use cg_domain::config::{Config, ProviderEntry};
use cg_domain::error::Result;
use cg_domain::model::ProviderKind;
use cg_domain::stream::{BoxStream, ProviderEvent};
use cg_gateway::api;
use cg_gateway::runtime::CancelMap;
use cg_gateway::state::AppState;
use cg_providers::credentials::ConfigCredentialStore;
use cg_providers::traits::{CompletionDocument, ModelAdapter, NormalizedRequest};
use cg_providers::{Dispatcher, ModelRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub adapter & fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct StubAdapter {
    answer: String,
    invoked: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl ModelAdapter for StubAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(&self, req: &NormalizedRequest) -> Result<CompletionDocument> {
        self.invoked.store(true, Ordering::SeqCst);
        Ok(CompletionDocument {
            content: self.answer.clone(),
            tool_calls: vec![],
            model: req.params.model.clone(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn complete_stream(
        &self,
        _req: &NormalizedRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        self.invoked.store(true, Ordering::SeqCst);
        let answer = self.answer.clone();
        Ok(Box::pin(futures_util::stream::iter(vec![
            Ok(ProviderEvent::Token { text: answer }),
            Ok(ProviderEvent::Done {
                finish_reason: Some("stop".into()),
            }),
        ])))
    }
}

fn test_state(adapter: Arc<dyn ModelAdapter>) -> AppState {
    let mut config = Config::default();
    config.llm.providers.push(ProviderEntry {
        kind: ProviderKind::OpenAi,
        base_url: "https://api.openai.com/v1".into(),
        api_key: Some("sk-test".into()),
        api_key_env: None,
        enabled: true,
    });
    let config = Arc::new(config);

    let mut registry = ModelRegistry::new(config.clone());
    registry.register(adapter);
    let credentials = Arc::new(ConfigCredentialStore::new(config.clone()).unwrap());

    AppState {
        config,
        dispatcher: Arc::new(Dispatcher::new(Arc::new(registry), credentials)),
        store: Arc::new(MemoryStore::new()),
        conversation_locks: Arc::new(ConversationLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        retriever: None,
        workflow: None,
    }
}

fn chat_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "course_name": "CS101",
        "stream": stream,
        "conversation": {
            "id": "c1",
            "model": model,
            "messages": [
                {"id": "m1", "role": "user", "content": "2+2?"}
            ]
        }
    })
}

async fn post_json(
    state: AppState,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, Vec<u8>) {
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn non_streaming_request_returns_exact_choices_document() {
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: Arc::new(AtomicBool::new(false)),
    }));

    let (status, body) = post_json(state, "/v1/chat", chat_body("gpt-4o-mini", false)).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"choices": [{"message": {"content": "4"}}]})
    );
}

#[tokio::test]
async fn unknown_model_is_rejected_without_invoking_any_adapter() {
    let invoked = Arc::new(AtomicBool::new(false));
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: invoked.clone(),
    }));

    let (status, body) = post_json(state, "/v1/chat", chat_body("gpt-99-ultra", false)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("unknown model"));
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn empty_conversation_is_a_validation_error() {
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: Arc::new(AtomicBool::new(false)),
    }));

    let mut body = chat_body("gpt-4o-mini", false);
    body["conversation"]["messages"] = serde_json::json!([]);
    let (status, bytes) = post_json(state, "/v1/chat", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(json["error"].as_str().unwrap().contains("no messages"));
}

#[tokio::test]
async fn streaming_request_delivers_deltas_and_closes() {
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: Arc::new(AtomicBool::new(false)),
    }));

    let (status, body) = post_json(state, "/v1/chat", chat_body("gpt-4o-mini", true)).await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    // Text chunks are plain data frames; the stream closed (we collected
    // the whole body), which is the terminal signal.
    assert!(text.contains("data: 4"), "missing delta in: {text}");
    assert!(!text.contains("event: error"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Models listing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn models_listing_has_a_stable_provider_key_set() {
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: Arc::new(AtomicBool::new(false)),
    }));

    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/v1/models?course_name=CS101")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let map = json.as_object().unwrap();

    // Every known provider key appears, configured or not.
    assert_eq!(map.len(), ProviderKind::ALL.len());
    for kind in ProviderKind::ALL {
        assert!(map.contains_key(kind.key()), "missing provider key {kind}");
    }
    // Only the configured provider lists models.
    assert!(!map["openai"].as_array().unwrap().is_empty());
    assert!(map["gemini"].as_array().unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn full_conversation(ids: &[&str]) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::json!({"id": id, "role": "user", "content": format!("msg {id}")}))
        .collect();
    serde_json::json!({
        "id": "c1",
        "model": "gpt-4o-mini",
        "messages": messages
    })
}

fn message_ids(conversation: &serde_json::Value) -> Vec<String> {
    conversation["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn sync_full_then_edit_delta_truncates_and_appends() {
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: Arc::new(AtomicBool::new(false)),
    }));

    // Seed with [a, b, c].
    let (status, _) = post_json(
        state.clone(),
        "/v1/conversations/sync",
        full_conversation(&["a", "b", "c"]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Edit c: [a, b] survive, the suffix replaces the rest.
    let delta = serde_json::json!({
        "id": "c1",
        "messagesDelta": [
            {"id": "c2", "role": "user", "content": "edited"},
            {"id": "d", "role": "assistant", "content": "re-answer"}
        ],
        "earliestEditedMessageId": "c"
    });
    let (status, body) = post_json(state.clone(), "/v1/conversations/sync", delta.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let merged: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(message_ids(&merged), vec!["a", "b", "c2", "d"]);

    // Idempotence: the same delta again changes nothing.
    let (status, body) = post_json(state, "/v1/conversations/sync", delta).await;
    assert_eq!(status, StatusCode::OK);
    let merged: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(message_ids(&merged), vec!["a", "b", "c2", "d"]);
}

#[tokio::test]
async fn ambiguous_edit_anchor_is_a_conflict() {
    let state = test_state(Arc::new(StubAdapter {
        answer: "4".into(),
        invoked: Arc::new(AtomicBool::new(false)),
    }));

    // Corrupt storage: duplicate ids.
    let (status, _) = post_json(
        state.clone(),
        "/v1/conversations/sync",
        full_conversation(&["a", "b", "b"]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let delta = serde_json::json!({
        "id": "c1",
        "messagesDelta": [{"id": "b2", "role": "user", "content": "edited"}],
        "earliestEditedMessageId": "b"
    });
    let (status, body) = post_json(state.clone(), "/v1/conversations/sync", delta).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("merge conflict"));

    // The stored conversation is untouched.
    let stored = state.store.load("c1").await.unwrap().unwrap();
    let ids: Vec<&str> = stored.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "b"]);
}
