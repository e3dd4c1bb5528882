//! Online trainer: one optimizer step per ready window.
//!
//! Each step draws a mini-batch of the newest window plus replayed ones,
//! differentiates every example in parallel against the same snapshot,
//! averages and clips the gradients, and publishes the resulting state as
//! the next version.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::replay::ReplayBuffer;
use crate::cfc::{Example, Gradients};
use crate::config::defaults::BPTT_DECAY;
use crate::config::{ForecastConfig, TrainingConfig};
use crate::model::{ModelError, ModelKey, ModelRegistry, ModelState, ParameterUpdate};
use crate::pipeline::EventBus;
use crate::storage::PersistenceLayer;
use crate::types::{PipelineEvent, Window};

/// Outcome of one training attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult {
    Published {
        model_key: ModelKey,
        version: u64,
        loss: f64,
        batch: usize,
    },
    /// The update was discarded; `retained` is still being served.
    Diverged {
        model_key: ModelKey,
        retained: u64,
        reason: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    /// The window was normalized with a different schema than the model's.
    #[error("schema mismatch (window {window}, model {model})")]
    SchemaMismatch { window: String, model: String },
    /// Fewer vectors than the horizon needs.
    #[error("window too short for the horizon")]
    TooShort,
    /// Another writer published first.
    #[error("publish conflict: {0}")]
    Conflict(String),
    #[error("cancelled")]
    Cancelled,
}

/// Borrowed view of one window as a training example.
struct PreparedExample<'w> {
    inputs: Vec<&'w [f64]>,
    dts: Vec<f64>,
    target: &'w [f64],
}

impl<'w> PreparedExample<'w> {
    fn from_window(window: &'w Window, horizon: usize) -> Option<Self> {
        let (inputs, target) = window.training_split(horizon)?;
        Some(Self {
            inputs: inputs.iter().map(|v| v.values.as_slice()).collect(),
            dts: window.step_dts(0, inputs.len()),
            target: &target.values,
        })
    }

    fn as_example(&self) -> Example<'_> {
        Example {
            inputs: &self.inputs,
            dts: &self.dts,
            target: self.target,
        }
    }
}

pub struct OnlineTrainer {
    registry: Arc<ModelRegistry>,
    events: Arc<EventBus>,
    store: Option<Arc<dyn PersistenceLayer>>,
    config: TrainingConfig,
    horizon: usize,
    replay: HashMap<ModelKey, ReplayBuffer>,
    rng: StdRng,
    cancel: Option<CancellationToken>,
}

impl OnlineTrainer {
    pub fn new(
        registry: Arc<ModelRegistry>,
        events: Arc<EventBus>,
        config: TrainingConfig,
        horizon: usize,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            registry,
            events,
            store: None,
            config,
            horizon,
            replay: HashMap::new(),
            rng,
            cancel: None,
        }
    }

    pub fn from_config(
        config: &ForecastConfig,
        registry: Arc<ModelRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::new(
            registry,
            events,
            config.training.clone(),
            config.pipeline.forecast_horizon,
        )
    }

    /// Save every published state to `store` (best-effort).
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PersistenceLayer>) -> Self {
        self.store = Some(store);
        self
    }

    /// Once `token` is cancelled, in-flight steps publish nothing.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Windows held for replay under `key`.
    pub fn replay_len(&self, key: &ModelKey) -> usize {
        self.replay.get(key).map_or(0, ReplayBuffer::len)
    }

    pub fn on_window_ready(&mut self, window: Arc<Window>) -> UpdateResult {
        self.on_window_ready_at(window, Utc::now())
    }

    pub fn on_window_ready_at(&mut self, window: Arc<Window>, now: DateTime<Utc>) -> UpdateResult {
        let key = self.registry.key_for(&window.satellite_id);
        let state = self.registry.get_or_bootstrap(&key, now);

        if window.schema_fingerprint() != state.schema_fingerprint() {
            let reason = SkipReason::SchemaMismatch {
                window: window.schema_fingerprint().to_string(),
                model: state.schema_fingerprint().to_string(),
            };
            warn!(model_key = %key, satellite_id = %window.satellite_id, %reason, "Skipping window");
            return UpdateResult::Skipped { reason };
        }

        let replay_k = self.config.batch_size.saturating_sub(1);
        let replay = self
            .replay
            .entry(key.clone())
            .or_insert_with(|| ReplayBuffer::new(self.config.replay_buffer_size));
        let replayed = replay.sample(replay_k, self.config.replay_sampling, &mut self.rng);

        let result = self.train_step(&state, &window, &replayed, now);

        if let Some(buffer) = self.replay.get_mut(&key) {
            buffer.push(window);
        }
        result
    }

    fn train_step(
        &self,
        state: &Arc<ModelState>,
        newest: &Window,
        replayed: &[Arc<Window>],
        now: DateTime<Utc>,
    ) -> UpdateResult {
        let mut prepared = Vec::with_capacity(replayed.len() + 1);
        match PreparedExample::from_window(newest, self.horizon) {
            Some(p) => prepared.push(p),
            None => {
                return UpdateResult::Skipped {
                    reason: SkipReason::TooShort,
                }
            }
        }
        prepared.extend(
            replayed
                .iter()
                .filter(|w| w.schema_fingerprint() == state.schema_fingerprint())
                .filter_map(|w| PreparedExample::from_window(w, self.horizon)),
        );

        let network = &state.parameters.network;
        let loss_weights = state.schema.loss_weights();
        let depth = self.config.bptt_depth;
        let per_example: Vec<_> = prepared
            .par_iter()
            .map(|p| network.gradients(p.as_example(), &loss_weights, depth, BPTT_DECAY))
            .collect();

        let batch = per_example.len();
        let mut grads = Gradients::zeros(network.weights());
        let mut loss = 0.0;
        for ex in &per_example {
            grads.add(&ex.grads);
            loss += ex.loss;
        }
        let scale = 1.0 / batch as f64;
        grads.scale(scale);
        loss *= scale;
        let grad_norm = grads.clip(self.config.max_grad_norm);
        let residuals = per_example
            .first()
            .map(|ex| ex.residuals.clone())
            .unwrap_or_default();

        debug!(model_key = %state.key, batch, loss, grad_norm, "Computed mini-batch gradients");

        let update = ParameterUpdate {
            grads,
            loss,
            residuals,
            max_param_norm: self.config.max_param_norm,
            now,
        };

        let next = match state.apply_update(update) {
            Ok(next) => next,
            Err(ModelError::Diverged(reason)) => {
                self.events.emit(PipelineEvent::TrainingDiverged {
                    model_key: state.key.to_string(),
                    retained_version: state.version,
                    reason: reason.clone(),
                });
                return UpdateResult::Diverged {
                    model_key: state.key.clone(),
                    retained: state.version,
                    reason,
                };
            }
            Err(e) => {
                return UpdateResult::Skipped {
                    reason: SkipReason::Conflict(e.to_string()),
                }
            }
        };

        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return UpdateResult::Skipped {
                reason: SkipReason::Cancelled,
            };
        }

        let published = match self.registry.publish(next) {
            Ok(published) => published,
            Err(e) => {
                warn!(model_key = %state.key, error = %e, "Publish rejected");
                return UpdateResult::Skipped {
                    reason: SkipReason::Conflict(e.to_string()),
                };
            }
        };

        self.events.emit(PipelineEvent::ModelPublished {
            model_key: published.key.to_string(),
            version: published.version,
            training_step_count: published.training_step_count,
            loss,
        });

        if let Some(store) = &self.store {
            if let Err(e) = store.save_model(&published) {
                warn!(model_key = %published.key, error = %e, "Failed to persist model state");
            }
        }

        UpdateResult::Published {
            model_key: published.key.clone(),
            version: published.version,
            loss,
            batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelScope};
    use crate::storage::InMemoryStore;
    use crate::types::{FeatureMeta, FeatureSchema, FeatureVector, FEATURE_COUNT};
    use chrono::{Duration, TimeZone};

    fn config(scope: ModelScope) -> ForecastConfig {
        ForecastConfig {
            model: ModelConfig {
                scope,
                sensory_neurons: 12,
                inter_neurons: 6,
                command_neurons: 4,
                motor_neurons: 4,
                ..ModelConfig::default()
            },
            training: TrainingConfig {
                batch_size: 4,
                replay_buffer_size: 8,
                ..TrainingConfig::default()
            },
            ..ForecastConfig::default()
        }
    }

    fn setup(scope: ModelScope) -> (OnlineTrainer, Arc<ModelRegistry>, Arc<EventBus>) {
        let cfg = config(scope);
        let registry = Arc::new(ModelRegistry::from_config(
            &cfg,
            Arc::new(FeatureSchema::default()),
        ));
        let events = Arc::new(EventBus::default());
        let trainer = OnlineTrainer::from_config(&cfg, Arc::clone(&registry), Arc::clone(&events));
        (trainer, registry, events)
    }

    fn window(satellite: &str, start: i64, fingerprint: &str) -> Arc<Window> {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let vectors = (0..8)
            .map(|i| FeatureVector {
                satellite_id: satellite.into(),
                timestamp: t0 + Duration::minutes(90 * (start + i)),
                values: (0..FEATURE_COUNT)
                    .map(|f| ((start + i) as f64 * 0.1 + f as f64 * 0.05).sin())
                    .collect(),
                meta: FeatureMeta {
                    schema_fingerprint: fingerprint.into(),
                    ..FeatureMeta::default()
                },
            })
            .collect();
        Arc::new(Window {
            satellite_id: satellite.into(),
            vectors,
            lead_in: None,
        })
    }

    #[test]
    fn test_first_window_publishes_version_one() {
        let (mut trainer, registry, events) = setup(ModelScope::Shared);
        let fp = registry.schema().fingerprint.clone();
        let result = trainer.on_window_ready(window("A", 0, &fp));
        assert!(matches!(
            result,
            UpdateResult::Published { version: 1, batch: 1, .. }
        ));
        let state = registry.snapshot(&ModelKey::Shared).unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.training_step_count, 1);
        assert_eq!(events.counts().model_published, 1);
        assert_eq!(trainer.replay_len(&ModelKey::Shared), 1);
    }

    #[test]
    fn test_replay_grows_batch() {
        let (mut trainer, registry, _) = setup(ModelScope::Shared);
        let fp = registry.schema().fingerprint.clone();
        let mut last = None;
        for i in 0..6 {
            last = Some(trainer.on_window_ready(window("A", i, &fp)));
        }
        assert!(matches!(
            last,
            Some(UpdateResult::Published { version: 6, batch: 4, .. })
        ));
    }

    #[test]
    fn test_schema_mismatch_is_skipped() {
        let (mut trainer, registry, events) = setup(ModelScope::Shared);
        let result = trainer.on_window_ready(window("A", 0, "other"));
        assert!(matches!(
            result,
            UpdateResult::Skipped {
                reason: SkipReason::SchemaMismatch { .. }
            }
        ));
        assert_eq!(registry.snapshot(&ModelKey::Shared).unwrap().version, 0);
        assert_eq!(events.counts().model_published, 0);
        let UpdateResult::Skipped { reason } = result else {
            unreachable!()
        };
        assert!(reason.to_string().starts_with("schema mismatch (window other, model "));
        assert_eq!(SkipReason::Conflict("version 3".into()).to_string(), "publish conflict: version 3");
    }

    #[test]
    fn test_divergence_retains_previous_version() {
        let (trainer, registry, events) = setup(ModelScope::Shared);
        let mut trainer = OnlineTrainer {
            config: TrainingConfig {
                max_param_norm: 1e-6,
                ..trainer.config.clone()
            },
            ..trainer
        };
        let fp = registry.schema().fingerprint.clone();
        let result = trainer.on_window_ready(window("A", 0, &fp));
        assert!(matches!(result, UpdateResult::Diverged { retained: 0, .. }));
        assert_eq!(registry.snapshot(&ModelKey::Shared).unwrap().version, 0);
        assert_eq!(events.counts().training_diverged, 1);
    }

    #[test]
    fn test_per_satellite_scope_trains_separately() {
        let (trainer, registry, _) = setup(ModelScope::PerSatellite);
        let store = Arc::new(InMemoryStore::new());
        let mut trainer = trainer.with_store(store.clone());
        let fp = registry.schema().fingerprint.clone();
        trainer.on_window_ready(window("A", 0, &fp));
        trainer.on_window_ready(window("A", 1, &fp));
        trainer.on_window_ready(window("B", 0, &fp));
        assert_eq!(registry.snapshot_for("A").unwrap().version, 2);
        assert_eq!(registry.snapshot_for("B").unwrap().version, 1);
        assert_eq!(
            store
                .load_model(&ModelKey::Satellite("A".into()))
                .unwrap()
                .unwrap()
                .version,
            2
        );
    }

    #[test]
    fn test_cancelled_step_publishes_nothing() {
        let (trainer, registry, _) = setup(ModelScope::Shared);
        let token = CancellationToken::new();
        let mut trainer = trainer.with_cancellation(token.clone());
        token.cancel();
        let fp = registry.schema().fingerprint.clone();
        let result = trainer.on_window_ready(window("A", 0, &fp));
        assert_eq!(
            result,
            UpdateResult::Skipped {
                reason: SkipReason::Cancelled
            }
        );
        assert_eq!(registry.snapshot(&ModelKey::Shared).unwrap().version, 0);
    }
}
