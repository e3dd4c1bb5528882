//! API handlers. Every handler answers with an [`Envelope`] or an [`ApiError`].

use std::time::Instant;

use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{ApiError, ApiResult, Envelope};
use crate::model::ModelKey;
use crate::pipeline::{PipelineHandle, PipelineStatus};
use crate::types::Prediction;

/// Largest `limit` accepted by list endpoints.
const MAX_LIST_LIMIT: usize = 1_000;
const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: PipelineHandle,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self {
            pipeline,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub models: usize,
    pub satellites: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub model_key: String,
    pub version: u64,
    pub training_step_count: u64,
    pub created_at: DateTime<Utc>,
    pub schema_fingerprint: String,
    pub num_params: usize,
    pub learning_rate: f64,
    /// Residual sigma per feature, standardized units
    pub residual_sigma: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn health(State(state): State<ApiState>) -> Envelope<HealthResponse> {
    Envelope::ok(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        models: state.pipeline.registry.keys().len(),
        satellites: state.pipeline.board.len(),
    })
}

pub async fn status(State(state): State<ApiState>) -> Envelope<PipelineStatus> {
    Envelope::ok(state.pipeline.status())
}

pub async fn prediction(
    State(state): State<ApiState>,
    Path(satellite_id): Path<String>,
) -> ApiResult<Prediction> {
    Ok(Envelope::ok(state.pipeline.predictor.predict(&satellite_id)?))
}

pub async fn recent_predictions(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Prediction>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }
    Ok(Envelope::ok(state.pipeline.predictor.recent(limit)))
}

/// `key` is `shared` or `satellite/<id>`.
pub async fn model(State(state): State<ApiState>, Path(key): Path<String>) -> ApiResult<ModelSummary> {
    let key: ModelKey = key.parse()?;
    let snapshot = state
        .pipeline
        .registry
        .snapshot(&key)
        .ok_or_else(|| ApiError::ModelNotFound(key.clone()))?;
    let params = &snapshot.parameters;
    Ok(Envelope::ok(ModelSummary {
        model_key: key.to_string(),
        version: snapshot.version,
        training_step_count: snapshot.training_step_count,
        created_at: snapshot.created_at,
        schema_fingerprint: snapshot.schema_fingerprint().to_string(),
        num_params: params.network.num_params(),
        learning_rate: params.optimizer.lr,
        residual_sigma: params.calibration.sigma(),
    }))
}
