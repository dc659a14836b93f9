//! Agent loop — the bounded model-call → tool-call → model-call driver.
//!
//! Entry point: [`run_turn`] spawns the loop and returns a handle with
//! the multiplexed event stream and the final-answer outcome.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;

use cg_domain::conversation::Conversation;
use cg_domain::error::{Error, Result};
use cg_domain::stream::ProviderEvent;
use cg_domain::tool::ToolCall;
use cg_providers::dispatch::normalize_conversation;
use cg_providers::traits::NormalizedMessage;
use cg_tools::ToolRegistry;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::mux::{EventSink, EVENT_CHANNEL_CAPACITY};

/// Hard bound on model turns per request. A model that keeps requesting
/// tools is forced into finalizing once the bound is hit — a safety
/// valve against infinite tool-call loops, not a soft hint.
pub const MAX_MODEL_TURNS: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnInput {
    pub conversation: Conversation,
    pub model_id: String,
    pub course_name: String,
}

/// Handle to one running request.
pub struct TurnHandle {
    pub request_id: String,
    /// The multiplexed output stream. Exactly one terminal event.
    pub events: tokio::sync::mpsc::Receiver<cg_domain::stream::StreamEvent>,
    /// The final user-visible answer (tool activity stripped), or the
    /// error that terminated the stream.
    pub outcome: oneshot::Receiver<Result<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one request: normalize, call the model, dispatch tools, loop.
///
/// The returned handle's event stream always terminates: the driver
/// sends `Done` on success and cancellation, `Error` on failure, and the
/// sink guarantees exactly one of them goes out.
pub fn run_turn(state: AppState, input: TurnInput, tools: Arc<ToolRegistry>) -> TurnHandle {
    let (sink, events) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
    let (outcome_tx, outcome) = oneshot::channel();

    let request_id = uuid::Uuid::new_v4().to_string();
    let cancel = state.cancel_map.register(&request_id);
    let cleanup_id = request_id.clone();

    tokio::spawn(async move {
        let result = run_turn_inner(&state, input, tools, &sink, &cancel).await;
        state.cancel_map.remove(&cleanup_id);

        match &result {
            Ok(_) => sink.done().await,
            Err(e) => {
                tracing::warn!(error = %e, "turn failed");
                sink.error(e.to_string()).await;
            }
        }
        // Receiver may be gone (pure streaming caller) — fine.
        let _ = outcome_tx.send(result);
    });

    TurnHandle {
        request_id,
        events,
        outcome,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn_inner — the tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    input: TurnInput,
    tools: Arc<ToolRegistry>,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<String> {
    let TurnInput {
        conversation,
        model_id,
        course_name,
    } = input;

    if conversation.messages.is_empty() {
        return Err(Error::Validation("conversation has no messages".into()));
    }

    let (_, descriptor) = state
        .dispatcher
        .registry()
        .resolve(&course_name, &model_id)?;

    let mut messages = normalize_conversation(&conversation, &descriptor);
    let tool_defs = tools.definitions();
    let temperature = Some(conversation.temperature);

    let mut final_text = String::new();

    for turn_idx in 0..MAX_MODEL_TURNS {
        if cancel.is_cancelled() {
            return Ok(final_text);
        }

        tracing::debug!(turn = turn_idx, model = %model_id, "model turn");

        let mut stream = state
            .dispatcher
            .complete_stream(
                &course_name,
                &model_id,
                messages.clone(),
                tool_defs.clone(),
                temperature,
            )
            .await?;

        // ── Consume this turn's token stream ──────────────────────
        let mut text_buf = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        // call_id -> (tool_name, accumulated argument JSON)
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();

        loop {
            // A cancel interrupts the wait; dropping the stream aborts
            // the in-flight provider call.
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(text_buf),
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event? {
                ProviderEvent::Token { text } => {
                    sink.text_delta(&text).await;
                    text_buf.push_str(&text);
                }
                ProviderEvent::ToolCallStarted { call_id, tool_name } => {
                    tc_bufs.insert(call_id, (tool_name, String::new()));
                }
                ProviderEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                }
                ProviderEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    tc_bufs.remove(&call_id);
                    pending.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                ProviderEvent::Done { .. } => {}
                ProviderEvent::Error { message } => {
                    // Provider-reported in-band failure; partial deltas
                    // already sent stay sent.
                    return Err(Error::UpstreamRejected { status: 0, message });
                }
            }
        }

        // Assemble calls that came through start/delta but never saw a
        // finished marker (some providers only use start+delta).
        for (call_id, (tool_name, args_buf)) in tc_bufs.drain() {
            let arguments = if args_buf.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args_buf).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON, defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            pending.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        final_text = text_buf;

        // No tool calls: this turn's text is the final answer.
        if pending.is_empty() {
            return Ok(final_text);
        }

        if turn_idx + 1 == MAX_MODEL_TURNS {
            tracing::warn!(
                bound = MAX_MODEL_TURNS,
                "model turn bound reached, forcing final answer"
            );
            return Ok(final_text);
        }

        // ── Tool fan-out ──────────────────────────────────────────
        messages.push(NormalizedMessage::assistant_with_calls(
            &final_text,
            pending.clone(),
        ));

        // Sibling calls run concurrently. Start flushes at dispatch and
        // End/Error the moment each completes — no sibling ordering.
        let mut in_flight = FuturesUnordered::new();
        for call in pending.iter().filter(|c| !c.call_id.is_empty()) {
            sink.tool_start(&call.tool_name, call.arguments.clone()).await;

            let tools = tools.clone();
            let sink = sink.clone();
            let call = call.clone();
            in_flight.push(async move {
                let invocation = tools.execute(&call).await;
                if let Some(error) = &invocation.error {
                    sink.tool_error(&call.tool_name, error).await;
                } else if let Some(output) = &invocation.output {
                    let output_json =
                        serde_json::to_value(output).unwrap_or(Value::Null);
                    sink.tool_end(&call.tool_name, output_json).await;
                }
                (call, invocation)
            });
        }

        let mut completed = HashMap::new();
        loop {
            // Dropping the fan-out set aborts still-pending executions.
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(final_text),
                next = in_flight.next() => next,
            };
            match next {
                Some((call, invocation)) => {
                    completed.insert(call.call_id.clone(), invocation);
                }
                None => break,
            }
        }

        // All results append in call order before the next model turn.
        for call in &pending {
            let Some(invocation) = completed.remove(&call.call_id) else {
                continue;
            };
            let is_error = invocation.error.is_some();
            let content = invocation
                .context_text()
                .unwrap_or_else(|| "(no output)".to_string());
            messages.push(NormalizedMessage::tool_result(
                &call.call_id,
                &call.tool_name,
                content,
                is_error,
            ));
        }
    }

    Ok(final_text)
}
