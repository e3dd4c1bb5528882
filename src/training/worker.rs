//! Background task feeding queued windows to the trainer.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::TrainingQueue;
use super::trainer::{OnlineTrainer, UpdateResult};

/// Runs training steps on the blocking pool so gradient work never stalls
/// the async runtime.
pub struct TrainerWorker {
    trainer: Arc<Mutex<OnlineTrainer>>,
    queue: Arc<TrainingQueue>,
    cancel: CancellationToken,
}

impl TrainerWorker {
    pub fn new(
        trainer: Arc<Mutex<OnlineTrainer>>,
        queue: Arc<TrainingQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            trainer,
            queue,
            cancel,
        }
    }

    /// Spawn the worker. The handle resolves to the number of windows
    /// processed once cancelled.
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> u64 {
        info!("Trainer worker started");
        let mut processed = 0u64;
        loop {
            // Once cancelled, leave the rest queued for the caller to drain
            while !self.cancel.is_cancelled() {
                let Some(window) = self.queue.pop() else {
                    break;
                };
                let trainer = Arc::clone(&self.trainer);
                let step = tokio::task::spawn_blocking(move || {
                    trainer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .on_window_ready(window)
                });
                match step.await {
                    Ok(result) => {
                        processed += 1;
                        if let UpdateResult::Skipped { reason } = &result {
                            debug!(%reason, "Training step skipped");
                        }
                    }
                    Err(e) => warn!(error = %e, "Training step panicked"),
                }
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.queue.notified() => {}
            }
        }
        info!(processed, "Trainer worker stopped");
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForecastConfig;
    use crate::model::{ModelKey, ModelRegistry};
    use crate::pipeline::EventBus;
    use crate::types::{FeatureMeta, FeatureSchema, FeatureVector, Window, FEATURE_COUNT};
    use chrono::{Duration, TimeZone, Utc};

    fn window(config: &ForecastConfig, fingerprint: &str, offset_hours: i64) -> Arc<Window> {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::hours(offset_hours);
        Arc::new(Window {
            satellite_id: "A".into(),
            vectors: (0..config.pipeline.window_size)
                .map(|i| FeatureVector {
                    satellite_id: "A".into(),
                    timestamp: t0 + Duration::hours(i as i64),
                    values: vec![0.1 * i as f64; FEATURE_COUNT],
                    meta: FeatureMeta {
                        schema_fingerprint: fingerprint.into(),
                        ..FeatureMeta::default()
                    },
                })
                .collect(),
            lead_in: None,
        })
    }

    fn setup(
        config: &ForecastConfig,
    ) -> (Arc<ModelRegistry>, Arc<EventBus>, Arc<Mutex<OnlineTrainer>>, Arc<TrainingQueue>) {
        let registry = Arc::new(ModelRegistry::from_config(
            config,
            Arc::new(FeatureSchema::default()),
        ));
        let events = Arc::new(EventBus::default());
        let trainer = OnlineTrainer::from_config(config, Arc::clone(&registry), Arc::clone(&events));
        let queue = Arc::new(TrainingQueue::new(8, Arc::clone(&events)));
        (registry, events, Arc::new(Mutex::new(trainer)), queue)
    }

    #[tokio::test]
    async fn test_worker_trains_queued_windows_and_stops() {
        let config = ForecastConfig::default();
        let (registry, events, trainer, queue) = setup(&config);
        let cancel = CancellationToken::new();
        let handle = TrainerWorker::new(trainer, Arc::clone(&queue), cancel.clone()).spawn();

        let fp = registry.schema().fingerprint.clone();
        let mut rx = events.subscribe();
        queue.push(window(&config, &fp, 0));

        let published = tokio::time::timeout(std::time::Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published.kind(), "model_published");
        assert_eq!(registry.snapshot(&ModelKey::Shared).unwrap().version, 1);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_step_keeps_remaining_windows_queued() {
        let config = ForecastConfig::default();
        let (registry, _events, trainer, queue) = setup(&config);
        let fp = registry.schema().fingerprint.clone();
        queue.push(window(&config, &fp, 0));
        queue.push(window(&config, &fp, 100));

        // Hold the trainer so the first step blocks inside the worker
        let guard = trainer.lock().unwrap();
        let cancel = CancellationToken::new();
        let handle = TrainerWorker::new(Arc::clone(&trainer), Arc::clone(&queue), cancel.clone()).spawn();
        // Wait until the worker has taken the first window
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        while queue.len() == 2 {
            assert!(tokio::time::Instant::now() < deadline, "worker never started a step");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();
        drop(guard);

        let processed = tokio::time::timeout(std::time::Duration::from_secs(30), handle)
            .await
            .unwrap()
            .unwrap();
        let version = registry.snapshot(&ModelKey::Shared).unwrap().version;
        assert_eq!(processed, version);
        assert_eq!(processed + queue.len() as u64, 2, "every window is trained or still queued");
        assert_eq!(queue.len(), 1);
    }
}
