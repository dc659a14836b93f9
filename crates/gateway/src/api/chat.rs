//! Chat endpoint — the primary interface for running requests.
//!
//! - `POST /v1/chat` with `stream: false` — single JSON document
//!   `{"choices": [{"message": {"content": ...}}]}`
//! - `POST /v1/chat` with `stream: true` — event stream: text chunks as
//!   plain `data:` frames, tool lifecycle as tagged `event: tool` JSON
//!   frames, terminated by stream close
//! - `POST /v1/chat/:request_id/stop` — cancel a running request

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use cg_domain::conversation::Conversation;
use cg_domain::error::Error;
use cg_domain::stream::StreamEvent;
use cg_providers::dispatch::{ChatDispatch, DispatchOutcome};

use crate::runtime::{run_turn, TurnHandle, TurnInput};
use crate::state::AppState;

use super::error_response;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub conversation: Conversation,
    pub course_name: String,
    /// Model override; falls back to the conversation's model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    /// None = every configured tool is available.
    #[serde(default, rename = "enabledTools")]
    pub enabled_tools: Option<Vec<String>>,
    #[serde(default, rename = "enabledDocumentGroups")]
    pub enabled_document_groups: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let model_id = body
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.conversation.model.clone());

    if body.conversation.messages.is_empty() {
        return error_response(&Error::Validation("conversation has no messages".into()));
    }
    if model_id.is_empty() {
        return error_response(&Error::Validation("no model specified".into()));
    }

    // Resolve up front: an unknown model fails here, before any adapter
    // or credential is touched.
    if let Err(e) = state
        .dispatcher
        .registry()
        .resolve(&body.course_name, &model_id)
    {
        return error_response(&e);
    }

    let tools = Arc::new(state.tools_for_request(
        &body.course_name,
        &body.conversation.id,
        body.enabled_tools.as_deref(),
        &body.enabled_document_groups,
    ));

    // Plain single-shot: no tools, no streaming — one dispatcher call.
    if !body.stream && tools.is_empty() {
        let dispatch = ChatDispatch {
            conversation: body.conversation,
            model_id,
            course_name: body.course_name,
            stream: false,
            tools: vec![],
        };
        return match state.dispatcher.dispatch(dispatch).await {
            Ok(DispatchOutcome::Document(doc)) => completion_document(doc.content),
            Ok(DispatchOutcome::Stream(_)) => {
                error_response(&Error::Validation("unexpected streaming outcome".into()))
            }
            Err(e) => error_response(&e),
        };
    }

    let input = TurnInput {
        conversation: body.conversation,
        model_id,
        course_name: body.course_name,
    };
    let handle = run_turn(state.clone(), input, tools);

    if body.stream {
        sse_response(handle)
    } else {
        drain_to_document(handle).await
    }
}

fn completion_document(content: String) -> Response {
    Json(serde_json::json!({
        "choices": [{"message": {"content": content}}]
    }))
    .into_response()
}

/// Non-streaming with tools: run the loop, discard the event stream,
/// answer with the final text.
async fn drain_to_document(handle: TurnHandle) -> Response {
    let TurnHandle {
        mut events, outcome, ..
    } = handle;

    while events.recv().await.is_some() {}

    match outcome.await {
        Ok(Ok(text)) => completion_document(text),
        Ok(Err(e)) => error_response(&e),
        Err(_) => error_response(&Error::Validation("request driver went away".into())),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming wire format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn sse_response(handle: TurnHandle) -> Response {
    let stream = make_sse_stream(handle);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn make_sse_stream(handle: TurnHandle) -> impl Stream<Item = Result<Event, Infallible>> {
    let TurnHandle { mut events, .. } = handle;

    async_stream::stream! {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    yield Ok(Event::default().data(text));
                }
                StreamEvent::Done => {
                    // Stream close is the terminal signal.
                    break;
                }
                StreamEvent::Error { message } => {
                    yield Ok(Event::default()
                        .event("error")
                        .data(serde_json::json!({ "error": message }).to_string()));
                    break;
                }
                tool_event => {
                    // tool-start / tool-end / tool-error ride the
                    // out-of-band `tool` channel as tagged JSON.
                    let data = serde_json::to_string(&tool_event).unwrap_or_default();
                    yield Ok(Event::default().event("tool").data(data));
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/:request_id/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stop(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    if state.cancel_map.cancel(&request_id) {
        Json(serde_json::json!({ "stopped": true })).into_response()
    } else {
        (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no running request with that id" })),
        )
            .into_response()
    }
}
