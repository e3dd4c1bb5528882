//! Event fan-out: broadcast channel, running counters and tracing.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::types::PipelineEvent;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Totals per event kind since startup.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EventCounts {
    pub record_rejected: u64,
    pub window_invalidated: u64,
    pub training_diverged: u64,
    pub trainer_backpressure: u64,
    pub model_published: u64,
}

#[derive(Default)]
struct Counters {
    record_rejected: AtomicU64,
    window_invalidated: AtomicU64,
    training_diverged: AtomicU64,
    trainer_backpressure: AtomicU64,
    model_published: AtomicU64,
}

/// Every event is logged, counted, and sent to current subscribers.
/// Emitting never blocks; a lagging subscriber loses old events.
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    counters: Counters,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            counters: Counters::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let counter = match &event {
            PipelineEvent::RecordRejected {
                source,
                satellite_id,
                timestamp,
                reason,
                detail,
            } => {
                debug!(%source, ?satellite_id, %timestamp, %reason, detail = %detail, "Record rejected");
                &self.counters.record_rejected
            }
            PipelineEvent::WindowInvalidated {
                satellite_id,
                gap_secs,
                discarded,
            } => {
                warn!(satellite_id = %satellite_id, gap_secs, discarded, "Window invalidated by observation gap");
                &self.counters.window_invalidated
            }
            PipelineEvent::TrainingDiverged {
                model_key,
                retained_version,
                reason,
            } => {
                error!(model_key = %model_key, retained_version, reason = %reason, "Training step diverged, update discarded");
                &self.counters.training_diverged
            }
            PipelineEvent::TrainerBackpressure {
                satellite_id,
                window_end,
                queue_capacity,
            } => {
                warn!(satellite_id = %satellite_id, ?window_end, queue_capacity, "Trainer queue full, dropped oldest window");
                &self.counters.trainer_backpressure
            }
            PipelineEvent::ModelPublished {
                model_key,
                version,
                training_step_count,
                loss,
            } => {
                info!(model_key = %model_key, version, training_step_count, loss, "Model published");
                &self.counters.model_published
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn counts(&self) -> EventCounts {
        let c = &self.counters;
        EventCounts {
            record_rejected: c.record_rejected.load(Ordering::Relaxed),
            window_invalidated: c.window_invalidated.load(Ordering::Relaxed),
            training_diverged: c.training_diverged.load(Ordering::Relaxed),
            trainer_backpressure: c.trainer_backpressure.load(Ordering::Relaxed),
            model_published: c.model_published.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_counts_and_broadcasts() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(PipelineEvent::WindowInvalidated {
            satellite_id: "A".into(),
            gap_secs: 90_000.0,
            discarded: 3,
        });
        bus.emit(PipelineEvent::ModelPublished {
            model_key: "shared".into(),
            version: 1,
            training_step_count: 1,
            loss: 0.5,
        });

        let counts = bus.counts();
        assert_eq!(counts.window_invalidated, 1);
        assert_eq!(counts.model_published, 1);
        assert_eq!(counts.record_rejected, 0);

        assert_eq!(rx.recv().await.unwrap().kind(), "window_invalidated");
        assert_eq!(rx.recv().await.unwrap().kind(), "model_published");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(PipelineEvent::TrainingDiverged {
            model_key: "shared".into(),
            retained_version: 4,
            reason: "non-finite loss".into(),
        });
        assert_eq!(bus.counts().training_diverged, 1);
    }
}
