//! Bounded hand-off between ingestion and the trainer.
//!
//! When full, the oldest pending window is dropped and a
//! `TrainerBackpressure` event is emitted. Pushing never blocks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

use crate::pipeline::EventBus;
use crate::types::{PipelineEvent, Window};

pub struct TrainingQueue {
    pending: Mutex<VecDeque<Arc<Window>>>,
    capacity: usize,
    notify: Notify,
    events: Arc<EventBus>,
}

impl TrainingQueue {
    pub fn new(capacity: usize, events: Arc<EventBus>) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            events,
        }
    }

    /// Enqueue `window`. Returns the dropped window, if any.
    pub fn push(&self, window: Arc<Window>) -> Option<Arc<Window>> {
        let dropped = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = if pending.len() >= self.capacity {
                pending.pop_front()
            } else {
                None
            };
            pending.push_back(window);
            dropped
        };

        if let Some(old) = &dropped {
            self.events.emit(PipelineEvent::TrainerBackpressure {
                satellite_id: old.satellite_id.clone(),
                window_end: old.last_timestamp(),
                queue_capacity: self.capacity,
            });
        }
        self.notify.notify_one();
        dropped
    }

    pub fn pop(&self) -> Option<Arc<Window>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait until something has been pushed since the last wake-up.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake a waiting consumer without pushing.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
