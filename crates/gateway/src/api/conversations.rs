//! Conversation sync endpoint.
//!
//! `POST /v1/conversations/sync` accepts a full conversation or a delta
//! and applies the merge engine under the per-conversation write lock —
//! merging is read-modify-write, so no two merges may touch the same
//! stored conversation concurrently.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};

use cg_conversations::{merge, save_with_retry};
use cg_domain::conversation::IncomingConversation;
use cg_domain::error::Error;

use crate::state::AppState;

use super::error_response;

pub async fn sync(
    State(state): State<AppState>,
    Json(incoming): Json<IncomingConversation>,
) -> Response {
    let id = match &incoming {
        IncomingConversation::Full(c) => c.id.clone(),
        IncomingConversation::Delta(d) => d.id.clone(),
    };
    if id.is_empty() {
        return error_response(&Error::Validation("conversation id is required".into()));
    }

    // Serialize the read-modify-write per conversation; different
    // conversations proceed independently.
    let _permit = state.conversation_locks.acquire(&id).await;

    let stored = match state.store.load(&id).await {
        Ok(stored) => stored,
        Err(e) => return error_response(&e),
    };

    let merged = match merge(stored, incoming) {
        Ok(merged) => merged,
        // MergeConflict leaves the stored conversation untouched.
        Err(e) => return error_response(&e),
    };

    if let Err(e) = save_with_retry(
        state.store.as_ref(),
        &merged,
        state.config.llm.max_retries,
    )
    .await
    {
        return error_response(&e);
    }

    tracing::debug!(conversation = %id, messages = merged.messages.len(), "conversation synced");
    Json(merged).into_response()
}
