//! Observable pipeline events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FeedSource, RejectReason};

/// Everything the pipeline reports about records it could not use and
/// models it published or refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RecordRejected {
        source: FeedSource,
        satellite_id: Option<String>,
        timestamp: DateTime<Utc>,
        reason: RejectReason,
        detail: String,
    },
    WindowInvalidated {
        satellite_id: String,
        gap_secs: f64,
        discarded: usize,
    },
    TrainingDiverged {
        model_key: String,
        retained_version: u64,
        reason: String,
    },
    TrainerBackpressure {
        satellite_id: String,
        /// Last timestamp of the dropped window
        window_end: Option<DateTime<Utc>>,
        queue_capacity: usize,
    },
    ModelPublished {
        model_key: String,
        version: u64,
        training_step_count: u64,
        loss: f64,
    },
}

impl PipelineEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::RecordRejected { .. } => "record_rejected",
            PipelineEvent::WindowInvalidated { .. } => "window_invalidated",
            PipelineEvent::TrainingDiverged { .. } => "training_diverged",
            PipelineEvent::TrainerBackpressure { .. } => "trainer_backpressure",
            PipelineEvent::ModelPublished { .. } => "model_published",
        }
    }
}
