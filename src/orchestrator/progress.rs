//! Per-task progress streaming.
//!
//! The orchestrator publishes progress messages keyed by task id;
//! consumers subscribe with a broadcast receiver. Late subscribers also
//! get the task's message history replayed, so a client attaching
//! mid-run sees the full sequence. Messages carry a per-task sequence
//! number for ordering and gap detection on the consumer side.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::types::{TaskStatus, TimelineEvent};

/// What a progress message announces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    /// Free-text stage update ("searching articles", ...).
    Status { step: String, detail: Option<String> },
    /// Unmerged events streamed as extraction completes, before the
    /// merger runs.
    PreliminaryEvents { events: Vec<TimelineEvent> },
    /// A non-fatal error the task survived (failed article, skipped
    /// keyword).
    Error { message: String },
    /// Terminal: the timeline is ready.
    TaskCompleted { viewpoint_id: Option<Uuid> },
    /// Terminal: the task failed.
    TaskFailed { note: Option<String> },
}

impl ProgressKind {
    /// The terminal status this message announces, if any.
    pub fn terminal_status(&self) -> Option<TaskStatus> {
        match self {
            ProgressKind::TaskCompleted { .. } => Some(TaskStatus::Completed),
            ProgressKind::TaskFailed { .. } => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// One progress message for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub task_id: Uuid,
    /// Monotonic per-task sequence number, starting at 0.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

struct TaskChannel {
    sender: broadcast::Sender<ProgressMessage>,
    history: Vec<ProgressMessage>,
    next_seq: u64,
}

/// In-process progress hub, keyed by task id.
///
/// Thread-safe and cloneable.
#[derive(Clone)]
pub struct ProgressHub {
    channels: Arc<RwLock<HashMap<Uuid, TaskChannel>>>,
    capacity: usize,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish a message for a task, assigning its sequence number.
    pub async fn publish(&self, task_id: Uuid, kind: ProgressKind) {
        let mut channels = self.channels.write().await;
        let capacity = self.capacity;
        let channel = channels.entry(task_id).or_insert_with(|| TaskChannel {
            sender: broadcast::channel(capacity).0,
            history: Vec::new(),
            next_seq: 0,
        });
        let message = ProgressMessage {
            task_id,
            seq: channel.next_seq,
            at: Utc::now(),
            kind,
        };
        channel.next_seq += 1;
        channel.history.push(message.clone());
        // Send errors just mean nobody is listening yet.
        let _ = channel.sender.send(message);
    }

    /// Subscribe to a task's progress. Returns the history so far plus a
    /// live receiver for everything published afterwards.
    pub async fn subscribe(
        &self,
        task_id: Uuid,
    ) -> (Vec<ProgressMessage>, broadcast::Receiver<ProgressMessage>) {
        let mut channels = self.channels.write().await;
        let capacity = self.capacity;
        let channel = channels.entry(task_id).or_insert_with(|| TaskChannel {
            sender: broadcast::channel(capacity).0,
            history: Vec::new(),
            next_seq: 0,
        });
        (channel.history.clone(), channel.sender.subscribe())
    }

    /// Subscribe as a single stream: the history is replayed first, then
    /// live messages follow. The stream ends on a terminal message
    /// (completed or failed) or when the channel closes. Convenient for
    /// SSE/WebSocket handlers.
    pub async fn stream(
        &self,
        task_id: Uuid,
    ) -> impl futures::Stream<Item = ProgressMessage> + Send {
        let (history, mut receiver) = self.subscribe(task_id).await;
        async_stream::stream! {
            for message in history {
                let terminal = message.kind.terminal_status().is_some();
                yield message;
                if terminal {
                    return;
                }
            }
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        let terminal = message.kind.terminal_status().is_some();
                        yield message;
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%task_id, skipped, "progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Drop the channel for a finished task once no one is listening.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, channel| channel.sender.receiver_count() > 0);
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        let (history, mut rx) = hub.subscribe(task_id).await;
        assert!(history.is_empty());

        hub.publish(
            task_id,
            ProgressKind::Status {
                step: "searching".into(),
                detail: None,
            },
        )
        .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 0);
        assert!(matches!(received.kind, ProgressKind::Status { .. }));
    }

    #[tokio::test]
    async fn late_subscriber_gets_history() {
        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();

        for step in ["searching", "fetching", "extracting"] {
            hub.publish(
                task_id,
                ProgressKind::Status {
                    step: step.into(),
                    detail: None,
                },
            )
            .await;
        }

        let (history, _rx) = hub.subscribe(task_id).await;
        assert_eq!(history.len(), 3);
        let seqs: Vec<u64> = history.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn tasks_are_isolated() {
        let hub = ProgressHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        hub.publish(
            a,
            ProgressKind::Status {
                step: "only for a".into(),
                detail: None,
            },
        )
        .await;

        let (history, _rx) = hub.subscribe(b).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn stream_replays_history_then_follows_live() {
        use futures::StreamExt;

        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        hub.publish(
            task_id,
            ProgressKind::Status {
                step: "replayed".into(),
                detail: None,
            },
        )
        .await;

        let mut stream = Box::pin(hub.stream(task_id).await);
        assert_eq!(stream.next().await.unwrap().seq, 0);

        hub.publish(
            task_id,
            ProgressKind::Status {
                step: "live".into(),
                detail: None,
            },
        )
        .await;
        assert_eq!(stream.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_message() {
        use futures::StreamExt;

        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        hub.publish(
            task_id,
            ProgressKind::Status {
                step: "merging".into(),
                detail: None,
            },
        )
        .await;
        hub.publish(task_id, ProgressKind::TaskCompleted { viewpoint_id: None })
            .await;

        let messages: Vec<ProgressMessage> = hub.stream(task_id).await.collect().await;
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            messages[1].kind,
            ProgressKind::TaskCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn cleanup_drops_idle_channels() {
        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        let (_, rx) = hub.subscribe(task_id).await;

        drop(rx);
        hub.cleanup().await;
        assert!(hub.channels.read().await.is_empty());
    }
}
