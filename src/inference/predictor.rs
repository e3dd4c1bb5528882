//! Forecasts from the latest committed window and published model.
//!
//! The predictor never waits on training: it reads one window `Arc` from
//! the board and one `Arc<ModelState>` from the registry, and works on
//! those snapshots.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::uncertainty::{estimator_from_config, z_score, UncertaintyEstimator};
use crate::config::ForecastConfig;
use crate::model::ModelRegistry;
use crate::pipeline::WindowBoard;
use crate::storage::PersistenceLayer;
use crate::types::{duration_secs, Prediction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unavailable {
    #[error("no ready window for satellite {satellite_id}")]
    NoWindow { satellite_id: String },
    #[error("no published model for satellite {satellite_id}")]
    NoModel { satellite_id: String },
    #[error("window schema {window} does not match model schema {model}")]
    SchemaMismatch { window: String, model: String },
}

impl Unavailable {
    pub const fn code(&self) -> &'static str {
        match self {
            Unavailable::NoWindow { .. } => "no_window",
            Unavailable::NoModel { .. } => "no_model",
            Unavailable::SchemaMismatch { .. } => "schema_mismatch",
        }
    }
}

struct Inner {
    board: Arc<WindowBoard>,
    registry: Arc<ModelRegistry>,
    estimator: Box<dyn UncertaintyEstimator>,
    store: Option<Arc<dyn PersistenceLayer>>,
    horizon: usize,
    input_len: usize,
    confidence_level: f64,
    z: f64,
    history: Mutex<VecDeque<Prediction>>,
    history_limit: usize,
}

/// Cheap to clone; clones share the history cache.
#[derive(Clone)]
pub struct Predictor {
    inner: Arc<Inner>,
}

impl Predictor {
    pub fn new(
        config: &ForecastConfig,
        board: Arc<WindowBoard>,
        registry: Arc<ModelRegistry>,
        store: Option<Arc<dyn PersistenceLayer>>,
    ) -> Self {
        Self::with_estimator(
            config,
            board,
            registry,
            store,
            estimator_from_config(&config.inference),
        )
    }

    pub fn with_estimator(
        config: &ForecastConfig,
        board: Arc<WindowBoard>,
        registry: Arc<ModelRegistry>,
        store: Option<Arc<dyn PersistenceLayer>>,
        estimator: Box<dyn UncertaintyEstimator>,
    ) -> Self {
        let confidence_level = config.inference.confidence_level;
        Self {
            inner: Arc::new(Inner {
                board,
                registry,
                estimator,
                store,
                horizon: config.pipeline.forecast_horizon,
                input_len: config.pipeline.input_len(),
                confidence_level,
                z: z_score(confidence_level),
                history: Mutex::new(VecDeque::new()),
                history_limit: config.pipeline.prediction_history,
            }),
        }
    }

    pub fn predict(&self, satellite_id: &str) -> Result<Prediction, Unavailable> {
        self.predict_at(satellite_id, Utc::now())
    }

    pub fn predict_at(&self, satellite_id: &str, now: DateTime<Utc>) -> Result<Prediction, Unavailable> {
        let inner = &*self.inner;
        let window = inner
            .board
            .latest_window(satellite_id)
            .ok_or_else(|| Unavailable::NoWindow {
                satellite_id: satellite_id.to_string(),
            })?;
        let state = inner
            .registry
            .snapshot_for(satellite_id)
            .ok_or_else(|| Unavailable::NoModel {
                satellite_id: satellite_id.to_string(),
            })?;
        if window.schema_fingerprint() != state.schema_fingerprint() {
            return Err(Unavailable::SchemaMismatch {
                window: window.schema_fingerprint().to_string(),
                model: state.schema_fingerprint().to_string(),
            });
        }
        let last = window
            .vectors
            .last()
            .ok_or_else(|| Unavailable::NoWindow {
                satellite_id: satellite_id.to_string(),
            })?;

        let input = window.prediction_input(inner.input_len);
        let start = window.len() - input.len();
        let dts = window.step_dts(start, window.len());
        let forecast = state
            .parameters
            .network
            .forecast(input.iter().map(|v| v.values.as_slice()).zip(dts));

        let sigma = inner.estimator.sigma(&state, inner.horizon);
        let lower = forecast.iter().zip(&sigma).map(|(f, s)| inner.z.mul_add(-s, *f)).collect();
        let upper = forecast.iter().zip(&sigma).map(|(f, s)| inner.z.mul_add(*s, *f)).collect();

        let step = window.median_step().unwrap_or_else(Duration::zero);
        let horizon = i32::try_from(inner.horizon).unwrap_or(i32::MAX);
        let for_timestamp = last.timestamp + step * horizon;

        let prediction = Prediction {
            satellite_id: satellite_id.to_string(),
            for_timestamp,
            produced_at: now,
            model_version: state.version,
            model_key: state.key.to_string(),
            schema_fingerprint: state.schema_fingerprint().to_string(),
            forecast_physical: state.schema.destandardize(&forecast),
            forecast_vector: forecast,
            uncertainty: sigma,
            lower,
            upper,
            confidence_level: inner.confidence_level,
            staleness_secs: duration_secs(now - last.timestamp),
            stale_weather: last.meta.stale_weather,
        };

        debug!(
            satellite_id,
            model_version = prediction.model_version,
            staleness_secs = prediction.staleness_secs,
            "Prediction produced"
        );
        self.remember(&prediction);
        Ok(prediction)
    }

    fn remember(&self, prediction: &Prediction) {
        let inner = &*self.inner;
        if inner.history_limit > 0 {
            let mut history = inner.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(prediction.clone());
            while history.len() > inner.history_limit {
                history.pop_front();
            }
        }
        if let Some(store) = &inner.store {
            if let Err(e) = store.append_prediction(prediction) {
                warn!(error = %e, "Failed to persist prediction");
            }
        }
    }

    /// Recent predictions, newest first. Served from the in-process cache;
    /// after a restart the cache is empty and the store answers instead.
    pub fn recent(&self, limit: usize) -> Vec<Prediction> {
        let cached: Vec<Prediction> = {
            let history = self.inner.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.iter().rev().take(limit).cloned().collect()
        };
        if !cached.is_empty() {
            return cached;
        }
        match &self.inner.store {
            Some(store) => store.recent_predictions(limit).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read stored predictions");
                Vec::new()
            }),
            None => cached,
        }
    }

    pub fn estimator_name(&self) -> &'static str {
        self.inner.estimator.name()
    }
}
