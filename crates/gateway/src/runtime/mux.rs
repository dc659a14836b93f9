//! Stream multiplexer.
//!
//! Merges the model's token stream and the tool lifecycle events —
//! produced concurrently by the agent loop and its tool tasks — into one
//! strictly-ordered output sequence over a bounded channel.
//!
//! Guarantees:
//! - tool events are flushed the moment they occur (a shared clone-able
//!   sink, ordered by arrival);
//! - writes block when the consumer is slow — nothing is buffered
//!   without bound and no event is ever silently discarded mid-stream;
//! - exactly one terminal event (`Done`/`Error`) per stream, and
//!   anything sent after termination is dropped with a debug log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use cg_domain::stream::StreamEvent;

/// Default channel capacity for one request's output stream.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Shared producer handle for one request's output stream.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    terminated: Arc<AtomicBool>,
}

impl EventSink {
    /// Create a sink/receiver pair with the given channel capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                terminated: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Whether a terminal event has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Send one event, blocking if the consumer is behind.
    ///
    /// The first terminal event wins; later sends of any kind are
    /// dropped. A closed receiver (consumer gone) is not an error for
    /// the producer — at-least-once delivery of partial output is
    /// acceptable, a blocked producer is not.
    pub async fn send(&self, event: StreamEvent) {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::AcqRel) {
                tracing::debug!(?event, "second terminal event dropped");
                return;
            }
        } else if self.is_terminated() {
            tracing::debug!(?event, "event after termination dropped");
            return;
        }

        if self.tx.send(event).await.is_err() {
            tracing::debug!("output consumer disconnected");
        }
    }

    // ── Convenience producers ──────────────────────────────────────

    pub async fn text_delta(&self, text: impl Into<String>) {
        self.send(StreamEvent::TextDelta { text: text.into() }).await;
    }

    pub async fn tool_start(&self, name: impl Into<String>, args: serde_json::Value) {
        self.send(StreamEvent::ToolStart {
            name: name.into(),
            args,
        })
        .await;
    }

    pub async fn tool_end(&self, name: impl Into<String>, output: serde_json::Value) {
        self.send(StreamEvent::ToolEnd {
            name: name.into(),
            output,
        })
        .await;
    }

    pub async fn tool_error(&self, name: impl Into<String>, error: impl Into<String>) {
        self.send(StreamEvent::ToolError {
            name: name.into(),
            error: error.into(),
        })
        .await;
    }

    pub async fn done(&self) {
        self.send(StreamEvent::Done).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.send(StreamEvent::Error {
            message: message.into(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn exactly_one_terminal_event() {
        let (sink, rx) = EventSink::channel(8);

        sink.text_delta("a").await;
        sink.done().await;
        sink.done().await;
        sink.error("late").await;
        drop(sink);

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::TextDelta { .. }));
        assert!(matches!(events[1], StreamEvent::Done));
    }

    #[tokio::test]
    async fn nothing_after_termination() {
        let (sink, rx) = EventSink::channel(8);

        sink.error("boom").await;
        sink.text_delta("ghost").await;
        sink.tool_start("retrieve_documents", serde_json::json!({})).await;
        drop(sink);

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error { .. }));
    }

    #[tokio::test]
    async fn first_terminal_wins() {
        let (sink, rx) = EventSink::channel(8);
        sink.error("real failure").await;
        sink.done().await;
        drop(sink);

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error { ref message } if message == "real failure"));
    }

    #[tokio::test]
    async fn concurrent_producers_interleave_without_loss() {
        let (sink, rx) = EventSink::channel(64);

        let token_sink = sink.clone();
        let tokens = tokio::spawn(async move {
            for i in 0..10 {
                token_sink.text_delta(format!("t{i}")).await;
            }
        });

        let tool_sink = sink.clone();
        let tools = tokio::spawn(async move {
            for i in 0..5 {
                tool_sink
                    .tool_start(format!("tool{i}"), serde_json::json!({}))
                    .await;
                tool_sink
                    .tool_end(format!("tool{i}"), serde_json::json!("ok"))
                    .await;
            }
        });

        tokens.await.unwrap();
        tools.await.unwrap();
        sink.done().await;
        drop(sink);

        let events = drain(rx).await;
        // 10 tokens + 10 tool events + 1 terminal, none dropped.
        assert_eq!(events.len(), 21);
        assert!(events[..20].iter().all(|e| !e.is_terminal()));
        assert!(events[20].is_terminal());
    }

    #[tokio::test]
    async fn slow_consumer_applies_backpressure() {
        let (sink, mut rx) = EventSink::channel(1);

        let producer = tokio::spawn(async move {
            sink.text_delta("one").await;
            sink.text_delta("two").await; // blocks until the consumer reads
            sink.done().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "producer must block, not drop");

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        producer.await.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_wedge_producer() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);

        // Terminal marker still completes without blocking forever.
        sink.text_delta("unheard").await;
        sink.done().await;
        assert!(sink.is_terminated());
    }
}
