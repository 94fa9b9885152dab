//! Batch lifecycle events for live subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{BatchStatus, EntryKind, EvaluationResult};

/// Something that happened to a batch, with the status derived afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    #[serde(rename_all = "camelCase")]
    BatchCreated {
        batch_id: String,
        batch_code: String,
        method_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ProgressAppended {
        batch_id: String,
        progress_id: String,
        stage_name: String,
        step_index: u32,
        kind: EntryKind,
        status: BatchStatus,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    EvaluationRecorded {
        batch_id: String,
        evaluation_id: String,
        result: EvaluationResult,
        status: BatchStatus,
        timestamp: DateTime<Utc>,
    },
    /// A failed evaluation was answered by a resubmission.
    #[serde(rename_all = "camelCase")]
    FailureResolved {
        batch_id: String,
        evaluation_id: String,
        progress_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            BatchEvent::BatchCreated { batch_id, .. }
            | BatchEvent::ProgressAppended { batch_id, .. }
            | BatchEvent::EvaluationRecorded { batch_id, .. }
            | BatchEvent::FailureResolved { batch_id, .. } => batch_id,
        }
    }
}

pub trait BatchEventReporter: Send + Sync {
    fn report(&self, event: BatchEvent);
}

/// Discards every event.
pub struct NoopReporter;

impl BatchEventReporter for NoopReporter {
    fn report(&self, _event: BatchEvent) {}
}

/// Fans events out over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastReporter {
    sender: Arc<broadcast::Sender<BatchEvent>>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<BatchEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for BroadcastReporter {
    fn default() -> Self {
        Self::new(100)
    }
}

impl BatchEventReporter for BroadcastReporter {
    fn report(&self, event: BatchEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
