//! Pipeline Coordinator - per-record processing sequence
//!
//! ```text
//! record → Normalizer → SequenceBuffer ─┬─ WindowBoard (read by Predictor)
//!                                       └─ TrainingQueue → OnlineTrainer
//! ```
//!
//! The coordinator is the single writer of normalizer and buffer state.
//! Training happens behind the queue, on the worker or in
//! [`PipelineCoordinator::drain_training`]; prediction reads snapshots and
//! never waits on either.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::board::{SatelliteStatus, WindowBoard};
use super::events::{EventBus, EventCounts};
use crate::config::{ForecastConfig, ModelConfig, ModelScope};
use crate::ingest::{FeedNormalizer, Normalized};
use crate::inference::Predictor;
use crate::model::{ModelKey, ModelRegistry};
use crate::sequence::{BufferError, BufferPhase, PushOutcome, SequenceBuffer};
use crate::storage::{PersistenceError, PersistenceLayer};
use crate::training::{OnlineTrainer, TrainerWorker, TrainingQueue, UpdateResult};
use crate::types::{
    duration_secs, FeatureSchema, FeatureStats, FeedRecord, PipelineEvent, RejectReason,
    SchemaError,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read feature statistics {path}: {source}")]
    StatsFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid feature statistics file {path}: {source}")]
    StatsFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Storage(#[from] PersistenceError),
}

/// What happened to one ingested record.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Rejected {
        reason: RejectReason,
        detail: String,
    },
    WeatherUpdated {
        observed_at: DateTime<Utc>,
    },
    Buffered {
        satellite_id: String,
        phase: BufferPhase,
        filled: usize,
        needed: usize,
    },
    WindowCommitted {
        satellite_id: String,
        window_end: DateTime<Utc>,
        /// A pending window was dropped to make room in the trainer queue
        dropped_pending: bool,
    },
    WindowInvalidated {
        satellite_id: String,
        gap_secs: f64,
        discarded: usize,
    },
}

/// Model state as reported by `/status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelStatus {
    pub model_key: String,
    pub version: u64,
    pub training_step_count: u64,
    pub created_at: DateTime<Utc>,
    pub schema_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineStatus {
    pub scope: ModelScope,
    pub uncertainty: &'static str,
    pub models: Vec<ModelStatus>,
    pub satellites: Vec<SatelliteStatus>,
    pub events: EventCounts,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

/// Read-side handles shared with the API and tests.
#[derive(Clone)]
pub struct PipelineHandle {
    pub predictor: Predictor,
    pub registry: Arc<ModelRegistry>,
    pub board: Arc<WindowBoard>,
    pub events: Arc<EventBus>,
    pub queue: Arc<TrainingQueue>,
}

impl PipelineHandle {
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            scope: self.registry.scope(),
            uncertainty: self.predictor.estimator_name(),
            models: self
                .registry
                .snapshots()
                .iter()
                .map(|s| ModelStatus {
                    model_key: s.key.to_string(),
                    version: s.version,
                    training_step_count: s.training_step_count,
                    created_at: s.created_at,
                    schema_fingerprint: s.schema_fingerprint().to_string(),
                })
                .collect(),
            satellites: self.board.statuses(),
            events: self.events.counts(),
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
        }
    }
}

/// Schema for this run: the built-in features, with frozen statistics from
/// `stats_path` when configured.
pub fn load_schema(config: &ModelConfig) -> Result<FeatureSchema, PipelineError> {
    let schema = FeatureSchema::default();
    let Some(path) = &config.stats_path else {
        return Ok(schema);
    };
    let bytes = std::fs::read(path).map_err(|source| PipelineError::StatsFile {
        path: path.clone(),
        source,
    })?;
    let stats: Vec<FeatureStats> =
        serde_json::from_slice(&bytes).map_err(|source| PipelineError::StatsFormat {
            path: path.clone(),
            source,
        })?;
    let schema = schema.with_stats(&stats)?;
    info!(path = %path.display(), fingerprint = %schema.fingerprint, "Loaded feature statistics");
    Ok(schema)
}

pub struct PipelineCoordinator {
    normalizer: FeedNormalizer,
    buffers: SequenceBuffer,
    board: Arc<WindowBoard>,
    registry: Arc<ModelRegistry>,
    events: Arc<EventBus>,
    queue: Arc<TrainingQueue>,
    trainer: Arc<Mutex<OnlineTrainer>>,
    predictor: Predictor,
    shutdown: CancellationToken,
    records_seen: u64,
}

impl PipelineCoordinator {
    /// Build the pipeline and bring every model slot to a servable state:
    /// restored from `store` when possible, freshly bootstrapped otherwise.
    pub fn new(
        config: &ForecastConfig,
        schema: FeatureSchema,
        store: Option<Arc<dyn PersistenceLayer>>,
    ) -> Self {
        Self::new_at(config, schema, store, Utc::now())
    }

    pub fn new_at(
        config: &ForecastConfig,
        schema: FeatureSchema,
        store: Option<Arc<dyn PersistenceLayer>>,
        now: DateTime<Utc>,
    ) -> Self {
        let schema = Arc::new(schema);
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(ModelRegistry::from_config(config, Arc::clone(&schema)));
        let board = Arc::new(WindowBoard::new());
        let queue = Arc::new(TrainingQueue::new(
            config.pipeline.backpressure_queue_capacity,
            Arc::clone(&events),
        ));
        let shutdown = CancellationToken::new();

        if let Some(store) = &store {
            restore_models(&registry, store.as_ref(), now);
        }
        if registry.scope() == ModelScope::Shared {
            registry.get_or_bootstrap(&ModelKey::Shared, now);
        }

        let mut trainer = OnlineTrainer::from_config(config, Arc::clone(&registry), Arc::clone(&events))
            .with_cancellation(shutdown.clone());
        if let Some(store) = &store {
            trainer = trainer.with_store(Arc::clone(store));
        }
        let predictor = Predictor::new(config, Arc::clone(&board), Arc::clone(&registry), store);

        info!(
            scope = ?registry.scope(),
            window_size = config.pipeline.window_size,
            horizon = config.pipeline.forecast_horizon,
            schema = %schema.fingerprint,
            "Pipeline coordinator initialized"
        );

        Self {
            normalizer: FeedNormalizer::new(schema, config.pipeline.max_omni_staleness()),
            buffers: SequenceBuffer::from_config(&config.pipeline),
            board,
            registry,
            events,
            queue,
            trainer: Arc::new(Mutex::new(trainer)),
            predictor,
            shutdown,
            records_seen: 0,
        }
    }

    /// Normalize, buffer, and on a ready window commit it and queue it for
    /// training. Never blocks on training.
    pub fn ingest(&mut self, record: &FeedRecord) -> IngestOutcome {
        self.records_seen += 1;
        let vector = match self.normalizer.normalize(record) {
            Ok(Normalized::Features(v)) => v,
            Ok(Normalized::Weather { observed_at, measured }) => {
                debug!(%observed_at, measured, "Space weather sample stored");
                return IngestOutcome::WeatherUpdated { observed_at };
            }
            Err(rejection) => {
                let detail = rejection.to_string();
                self.events.emit(PipelineEvent::RecordRejected {
                    source: record.source,
                    satellite_id: record.satellite_id.clone(),
                    timestamp: record.timestamp,
                    reason: rejection.reason,
                    detail: detail.clone(),
                });
                return IngestOutcome::Rejected {
                    reason: rejection.reason,
                    detail,
                };
            }
        };

        let satellite_id = vector.satellite_id.clone();
        let outcome = match self.buffers.push(vector) {
            Ok(outcome) => outcome,
            Err(e @ BufferError::OutOfOrder { .. }) => {
                let detail = e.to_string();
                self.events.emit(PipelineEvent::RecordRejected {
                    source: record.source,
                    satellite_id: Some(satellite_id),
                    timestamp: record.timestamp,
                    reason: RejectReason::OutOfOrder,
                    detail: detail.clone(),
                });
                return IngestOutcome::Rejected {
                    reason: RejectReason::OutOfOrder,
                    detail,
                };
            }
        };

        let result = match outcome {
            PushOutcome::WindowReady(window) => {
                let window = Arc::new(window);
                let window_end = window.last_timestamp().unwrap_or(record.timestamp);
                self.board.commit(Arc::clone(&window));
                if self.registry.scope() == ModelScope::PerSatellite {
                    self.registry
                        .get_or_bootstrap(&self.registry.key_for(&satellite_id), record.timestamp);
                }
                let dropped = self.queue.push(window);
                IngestOutcome::WindowCommitted {
                    satellite_id: satellite_id.clone(),
                    window_end,
                    dropped_pending: dropped.is_some(),
                }
            }
            PushOutcome::WindowPending { filled, needed } => IngestOutcome::Buffered {
                satellite_id: satellite_id.clone(),
                phase: self.buffers.phase(&satellite_id),
                filled,
                needed,
            },
            PushOutcome::WindowInvalidated { gap, discarded } => {
                let gap_secs = duration_secs(gap);
                self.board.invalidate(&satellite_id);
                self.events.emit(PipelineEvent::WindowInvalidated {
                    satellite_id: satellite_id.clone(),
                    gap_secs,
                    discarded,
                });
                IngestOutcome::WindowInvalidated {
                    satellite_id: satellite_id.clone(),
                    gap_secs,
                    discarded,
                }
            }
        };

        self.board.record(
            &satellite_id,
            self.buffers.phase(&satellite_id),
            self.buffers.filled(&satellite_id),
            self.buffers.last_observation(&satellite_id),
        );
        result
    }

    /// Train every queued window on the calling thread.
    pub fn drain_training(&self) -> Vec<UpdateResult> {
        let mut results = Vec::new();
        while let Some(window) = self.queue.pop() {
            let result = self
                .trainer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_window_ready(window);
            results.push(result);
        }
        results
    }

    /// Start the background trainer; it stops once `stop` is cancelled.
    /// With a child of [`Self::shutdown_token`] the worker can be stopped
    /// without cancelling the update in flight.
    pub fn spawn_trainer(&self, stop: CancellationToken) -> JoinHandle<u64> {
        TrainerWorker::new(Arc::clone(&self.trainer), Arc::clone(&self.queue), stop).spawn()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            predictor: self.predictor.clone(),
            registry: Arc::clone(&self.registry),
            board: Arc::clone(&self.board),
            events: Arc::clone(&self.events),
            queue: Arc::clone(&self.queue),
        }
    }

    pub const fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub const fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub const fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn buffer_phase(&self, satellite_id: &str) -> BufferPhase {
        self.buffers.phase(satellite_id)
    }

    pub fn status(&self) -> PipelineStatus {
        self.handle().status()
    }

    pub const fn records_seen(&self) -> u64 {
        self.records_seen
    }
}

/// Load persisted states into the registry. A state trained against a
/// different schema is replaced by a fresh model one version above it.
fn restore_models(registry: &ModelRegistry, store: &dyn PersistenceLayer, now: DateTime<Utc>) {
    let keys = match store.list_model_keys() {
        Ok(keys) => keys,
        Err(e) => {
            warn!(backend = store.backend_name(), error = %e, "Could not list stored models, starting fresh");
            return;
        }
    };
    let wanted = |key: &ModelKey| match registry.scope() {
        ModelScope::Shared => *key == ModelKey::Shared,
        ModelScope::PerSatellite => matches!(key, ModelKey::Satellite(_)),
    };

    for key in keys.into_iter().filter(wanted) {
        let persisted = match store.load_model(&key) {
            Ok(Some(state)) => state,
            Ok(None) => continue,
            Err(e) => {
                warn!(model_key = %key, error = %e, "Stored model unreadable, bootstrapping");
                continue;
            }
        };
        let state = if persisted.schema_fingerprint() == registry.schema().fingerprint {
            info!(model_key = %key, version = persisted.version, "Restored model");
            persisted
        } else {
            warn!(
                model_key = %key,
                stored_schema = persisted.schema_fingerprint(),
                "Stored model uses another schema, starting a new lineage"
            );
            registry.fresh_state(key.clone(), persisted.version + 1, now)
        };
        if let Err(e) = registry.restore(state) {
            warn!(model_key = %key, error = %e, "Could not restore model");
        }
    }
}
