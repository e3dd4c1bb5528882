//! System-wide default constants.
//!
//! Centralises magic numbers used across the pipeline.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Pipeline
// ============================================================================

/// Observations per window.
pub const WINDOW_SIZE: usize = 8;

/// Steps ahead of the last input observation that the model forecasts.
pub const FORECAST_HORIZON: usize = 1;

/// Largest gap between consecutive observations of one satellite before its
/// buffer is invalidated (seconds). 21 600 = 6 hours.
pub const MAX_GAP_SECS: u64 = 21_600;

/// Oldest OMNI sample still joined to a TLE observation (seconds).
/// 10 800 = 3 hours.
pub const MAX_OMNI_STALENESS_SECS: u64 = 10_800;

/// Windows waiting for the trainer before the oldest is dropped.
pub const BACKPRESSURE_QUEUE_CAPACITY: usize = 64;

/// Recent predictions kept in memory for the API.
pub const PREDICTION_HISTORY: usize = 256;

/// OMNI samples retained for as-of joins.
pub const WEATHER_HISTORY_LIMIT: usize = 4_096;

/// Upper bound accepted for any configured duration (seconds). 100 years.
pub const MAX_DURATION_SECS: u64 = 3_153_600_000;

// ============================================================================
// Training
// ============================================================================

/// Past windows retained per model for replay.
pub const REPLAY_BUFFER_SIZE: usize = 256;

/// Windows per optimizer step (newest + replayed).
pub const BATCH_SIZE: usize = 8;

/// Timesteps back-propagated through before truncation.
pub const BPTT_DEPTH: usize = 8;

/// Gradient decay applied per timestep walked back.
pub const BPTT_DECAY: f64 = 0.7;

/// Adam base learning rate.
pub const LEARNING_RATE: f64 = 0.001;

/// Multiplicative learning-rate decay per step.
pub const LR_DECAY: f64 = 0.9999;

/// Learning-rate floor.
pub const LR_FLOOR: f64 = 0.0001;

/// Global gradient-norm clip.
pub const MAX_GRAD_NORM: f64 = 5.0;

/// Parameter L2 norm above which an update counts as diverged.
pub const MAX_PARAM_NORM: f64 = 10_000.0;

/// Seed for replay sampling.
pub const TRAINING_SEED: u64 = 7;

/// EMA factor for per-feature residual calibration.
pub const RESIDUAL_EMA_ALPHA: f64 = 0.05;

// ============================================================================
// Model
// ============================================================================

pub const SENSORY_NEURONS: usize = 16;
pub const INTER_NEURONS: usize = 16;
pub const COMMAND_NEURONS: usize = 8;
pub const MOTOR_NEURONS: usize = 8;

/// Seed for weight initialisation and sparse wiring.
pub const MODEL_SEED: u64 = 42;

// ============================================================================
// Inference
// ============================================================================

/// Per-feature sigma used before any residuals exist, and by the fixed
/// calibration strategy.
pub const FIXED_SIGMA: f64 = 1.0;

/// Two-sided coverage of reported prediction intervals.
pub const CONFIDENCE_LEVEL: f64 = 0.95;

// ============================================================================
// Storage / Server
// ============================================================================

pub const STORAGE_PATH: &str = "data/orbcast.db";

pub const SERVER_ADDR: &str = "127.0.0.1:8080";

/// Predictions kept by the in-memory store.
pub const IN_MEMORY_PREDICTION_LIMIT: usize = 10_000;
