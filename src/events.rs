//! Push notifications for pipeline consumers.
//!
//! Readers that want to react to progress (a documentation browser, a
//! diagram view, an SSE bridge) subscribe to an [`EventBus`] instead of
//! polling the store. Events are best-effort: publishing with no
//! subscribers, or to a lagging subscriber, drops them.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::AnalysisStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StatusChanged {
        repo_id: String,
        status: AnalysisStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    DescriptionReady {
        repo_id: String,
        subsystem: String,
    },
    ExplanationReady {
        repo_id: String,
        path: String,
    },
}

/// Cloneable broadcast handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
