//! Streaming Coordinator (C10): turns a workflow's progress into the
//! canonical [`StreamEvent`](crate::completion::StreamEvent) sequence a
//! caller can consume live over SSE/WebSocket (§4.10).
//!
//! One unbounded channel per session. `workflow_start` is emitted before the
//! runner starts, every event the runner emits is forwarded as produced, and
//! exactly one of `workflow_complete`/`error` is emitted once the runner
//! finishes — the ordering invariant §8's scenarios depend on.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::completion::{StreamEvent, StreamEventType};
use crate::error::Result;

/// The producer side of a session's event stream. Cheaply [`Clone`]able so
/// every node/task touching a session can hold one.
#[derive(Clone)]
pub struct SessionStreamHandle {
    session_id: String,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl SessionStreamHandle {
    /// This handle's session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emit an event. Silently dropped if the consumer has gone away.
    pub fn emit(&self, event_type: StreamEventType, content: Option<String>, extra: HashMap<String, serde_json::Value>) {
        let is_final = matches!(event_type, StreamEventType::WorkflowComplete | StreamEventType::ContentComplete);
        let _ = self.tx.send(StreamEvent {
            event_type,
            timestamp: chrono::Utc::now(),
            session_id: self.session_id.clone(),
            content,
            chunk_index: None,
            is_final,
            extra,
        });
    }

    /// Emit a bare status update.
    pub fn status(&self, message: impl Into<String>) {
        self.emit(StreamEventType::Status, Some(message.into()), HashMap::new());
    }

    /// Emit that the orchestrator chose a route.
    pub fn routing_decision(&self, route: impl Into<String>) {
        let mut extra = HashMap::new();
        extra.insert("route".to_string(), serde_json::Value::String(route.into()));
        self.emit(StreamEventType::RoutingDecision, None, extra);
    }

    fn emit_node(&self, node_id: &str, event_type: StreamEventType, content: Option<String>) {
        let mut extra = HashMap::new();
        extra.insert("node_id".to_string(), serde_json::Value::String(node_id.to_string()));
        self.emit(event_type, content, extra);
    }

    /// Wrap a node's execution so it emits exactly one `node_start` and
    /// exactly one terminal event (`node_complete` on success, `error` on
    /// failure) regardless of which branch `f` takes.
    pub async fn run_node<F, Fut, T>(&self, node_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.emit_node(node_id, StreamEventType::NodeStart, None);
        match f().await {
            Ok(value) => {
                self.emit_node(node_id, StreamEventType::NodeComplete, None);
                Ok(value)
            }
            Err(e) => {
                self.emit_node(node_id, StreamEventType::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Coalesces rapid `Progress` events into at most one per `min_interval`, so
/// a tight scheduler loop doesn't flood a slow consumer (§4.10's
/// backpressure note).
pub struct ProgressCoalescer {
    handle: SessionStreamHandle,
    min_interval: Duration,
    last_emit: parking_lot::Mutex<Option<Instant>>,
}

impl ProgressCoalescer {
    /// A coalescer emitting at most once per `min_interval` on `handle`.
    #[must_use]
    pub fn new(handle: SessionStreamHandle, min_interval: Duration) -> Self {
        Self {
            handle,
            min_interval,
            last_emit: parking_lot::Mutex::new(None),
        }
    }

    /// Offer a progress update. Emitted immediately if `min_interval` has
    /// elapsed since the last emission, otherwise dropped.
    pub fn progress(&self, message: impl Into<String>) {
        let now = Instant::now();
        let mut last = self.last_emit.lock();
        let should_emit = last.map_or(true, |t| now.duration_since(t) >= self.min_interval);
        if should_emit {
            *last = Some(now);
            drop(last);
            self.handle.emit(StreamEventType::Progress, Some(message.into()), HashMap::new());
        }
    }
}

/// Run `runner` against a fresh session stream, returning a [`Stream`] of
/// events the caller can forward to an HTTP response, plus the task handle
/// so the caller can await completion independently of draining the stream.
///
/// `runner` receives a [`SessionStreamHandle`] it may clone and hand to
/// nodes; its `Result` return value becomes the `workflow_complete` payload
/// (serialized) or the terminal `error` event.
pub fn stream_execution<F, Fut>(
    session_id: impl Into<String>,
    runner: F,
) -> (impl Stream<Item = StreamEvent>, tokio::task::JoinHandle<()>)
where
    F: FnOnce(SessionStreamHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send,
{
    let session_id = session_id.into();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionStreamHandle { session_id, tx };
    let task_handle = handle.clone();

    let join = tokio::spawn(async move {
        task_handle.emit(StreamEventType::WorkflowStart, None, HashMap::new());
        match runner(task_handle.clone()).await {
            Ok(result) => {
                let content = serde_json::to_string(&result).ok();
                task_handle.emit(StreamEventType::WorkflowComplete, content, HashMap::new());
            }
            Err(e) => {
                task_handle.emit(StreamEventType::Error, Some(e.to_string()), HashMap::new());
            }
        }
        // `task_handle` (holding the sender) drops here, closing the stream.
    });

    (UnboundedReceiverStream::new(rx), join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn stream_execution_brackets_success_with_start_and_complete() {
        let (stream, join) = stream_execution("s1", |_handle| async move { Ok(serde_json::json!({"ok": true})) });
        let events: Vec<StreamEvent> = stream.collect().await;
        join.await.unwrap();

        assert_eq!(events.first().unwrap().event_type, StreamEventType::WorkflowStart);
        assert_eq!(events.last().unwrap().event_type, StreamEventType::WorkflowComplete);
        assert!(events.last().unwrap().is_final);
    }

    #[tokio::test]
    async fn stream_execution_brackets_failure_with_start_and_error() {
        let (stream, join) = stream_execution("s1", |_handle| async move {
            Err(crate::error::Error::Execution(crate::error::ExecutionError::AggregationFailed(
                "boom".to_string(),
            )))
        });
        let events: Vec<StreamEvent> = stream.collect().await;
        join.await.unwrap();

        assert_eq!(events.first().unwrap().event_type, StreamEventType::WorkflowStart);
        assert_eq!(events.last().unwrap().event_type, StreamEventType::Error);
    }

    #[tokio::test]
    async fn run_node_emits_exactly_one_start_and_one_terminal_event_per_node() {
        let (stream, join) = stream_execution("s1", |handle| async move {
            handle.run_node("classify", || async { Ok::<_, crate::error::Error>(()) }).await?;
            let failing: Result<()> = handle
                .run_node("plan", || async {
                    Err(crate::error::Error::Execution(crate::error::ExecutionError::AggregationFailed(
                        "nope".to_string(),
                    )))
                })
                .await;
            // Surface the node failure as the workflow's own failure.
            failing?;
            Ok(serde_json::json!({}))
        });
        let events: Vec<StreamEvent> = stream.collect().await;
        join.await.unwrap();

        let node_starts = events.iter().filter(|e| e.event_type == StreamEventType::NodeStart).count();
        let node_completes = events.iter().filter(|e| e.event_type == StreamEventType::NodeComplete).count();
        assert_eq!(node_starts, 2);
        assert_eq!(node_completes, 1, "only the successful node should emit node_complete");
    }

    #[test]
    fn progress_coalescer_drops_rapid_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionStreamHandle { session_id: "s1".to_string(), tx };
        let coalescer = ProgressCoalescer::new(handle, Duration::from_secs(3600));
        coalescer.progress("first");
        coalescer.progress("second");
        coalescer.progress("third");

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content.as_deref(), Some("first"));
    }
}
