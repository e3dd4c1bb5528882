//! Forecast Configuration - pipeline, training and serving knobs as TOML values
//!
//! Every struct implements `Default` with the values in [`super::defaults`],
//! so a missing file or section behaves exactly like the built-in setup.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "ORBCAST_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "orbcast.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a forecasting deployment.
///
/// Load with `ForecastConfig::load()` which searches:
/// 1. `$ORBCAST_CONFIG` env var
/// 2. `./orbcast.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ForecastConfig {
    /// Windowing, staleness and queueing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Online trainer
    #[serde(default)]
    pub training: TrainingConfig,

    /// Network shape and model scope
    #[serde(default)]
    pub model: ModelConfig,

    /// Prediction uncertainty
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Model and prediction persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl ForecastConfig {
    /// Load configuration using the standard search order:
    /// 1. `$ORBCAST_CONFIG` environment variable
    /// 2. `./orbcast.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// A file that exists but fails to parse or validate is an error; only
    /// the absence of a file falls through to the next step.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded forecast config from {CONFIG_ENV_VAR}");
                return Ok(config);
            }
            warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded forecast config from ./{LOCAL_CONFIG_FILE}");
            return Ok(config);
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are logged as warnings with suggestions; they never fail
    /// the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section. All problems are collected before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (mut errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!(field = %w.field, "{}", w);
        }
        errors.extend(super::validation::validate_network_shape(self));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Observations per window (W)
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Steps between the last model input and the forecast target (H)
    #[serde(default = "default_forecast_horizon")]
    pub forecast_horizon: usize,

    /// Gap that invalidates a satellite's buffer
    #[serde(default = "default_max_gap_secs")]
    pub max_gap_secs: u64,

    /// Oldest OMNI sample still joined to an observation
    #[serde(default = "default_max_omni_staleness_secs")]
    pub max_omni_staleness_secs: u64,

    /// Windows waiting for the trainer before drop-oldest kicks in
    #[serde(default = "default_backpressure_queue_capacity")]
    pub backpressure_queue_capacity: usize,

    /// Recent predictions cached in memory (0 disables the cache)
    #[serde(default = "default_prediction_history")]
    pub prediction_history: usize,
}

fn default_window_size() -> usize { defaults::WINDOW_SIZE }
fn default_forecast_horizon() -> usize { defaults::FORECAST_HORIZON }
fn default_max_gap_secs() -> u64 { defaults::MAX_GAP_SECS }
fn default_max_omni_staleness_secs() -> u64 { defaults::MAX_OMNI_STALENESS_SECS }
fn default_backpressure_queue_capacity() -> usize { defaults::BACKPRESSURE_QUEUE_CAPACITY }
fn default_prediction_history() -> usize { defaults::PREDICTION_HISTORY }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            forecast_horizon: default_forecast_horizon(),
            max_gap_secs: default_max_gap_secs(),
            max_omni_staleness_secs: default_max_omni_staleness_secs(),
            backpressure_queue_capacity: default_backpressure_queue_capacity(),
            prediction_history: default_prediction_history(),
        }
    }
}

impl PipelineConfig {
    pub fn max_gap(&self) -> Duration {
        secs(self.max_gap_secs)
    }

    pub fn max_omni_staleness(&self) -> Duration {
        secs(self.max_omni_staleness_secs)
    }

    /// Vectors fed to the network per window: `W - H`.
    pub fn input_len(&self) -> usize {
        self.window_size.saturating_sub(self.forecast_horizon)
    }
}

fn secs(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

// ============================================================================
// Training
// ============================================================================

/// How replayed windows are drawn for each mini-batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplaySampling {
    /// Seeded uniform draw without replacement
    #[default]
    Uniform,
    /// The newest replayed windows
    MostRecent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    #[serde(default = "default_replay_buffer_size")]
    pub replay_buffer_size: usize,

    /// Windows per optimizer step, including the newest
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub replay_sampling: ReplaySampling,

    #[serde(default = "default_bptt_depth")]
    pub bptt_depth: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_lr_decay")]
    pub lr_decay: f64,

    #[serde(default = "default_lr_floor")]
    pub lr_floor: f64,

    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,

    /// Parameter norm treated as divergence
    #[serde(default = "default_max_param_norm")]
    pub max_param_norm: f64,

    #[serde(default = "default_training_seed")]
    pub seed: u64,
}

fn default_replay_buffer_size() -> usize { defaults::REPLAY_BUFFER_SIZE }
fn default_batch_size() -> usize { defaults::BATCH_SIZE }
fn default_bptt_depth() -> usize { defaults::BPTT_DEPTH }
fn default_learning_rate() -> f64 { defaults::LEARNING_RATE }
fn default_lr_decay() -> f64 { defaults::LR_DECAY }
fn default_lr_floor() -> f64 { defaults::LR_FLOOR }
fn default_max_grad_norm() -> f64 { defaults::MAX_GRAD_NORM }
fn default_max_param_norm() -> f64 { defaults::MAX_PARAM_NORM }
fn default_training_seed() -> u64 { defaults::TRAINING_SEED }

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            replay_buffer_size: default_replay_buffer_size(),
            batch_size: default_batch_size(),
            replay_sampling: ReplaySampling::default(),
            bptt_depth: default_bptt_depth(),
            learning_rate: default_learning_rate(),
            lr_decay: default_lr_decay(),
            lr_floor: default_lr_floor(),
            max_grad_norm: default_max_grad_norm(),
            max_param_norm: default_max_param_norm(),
            seed: default_training_seed(),
        }
    }
}

// ============================================================================
// Model
// ============================================================================

/// Whether satellites share one model or each get their own.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelScope {
    /// One model; satellite identity is an input feature
    #[default]
    Shared,
    /// One model per satellite, bootstrapped lazily
    PerSatellite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub scope: ModelScope,

    #[serde(default = "default_sensory_neurons")]
    pub sensory_neurons: usize,

    #[serde(default = "default_inter_neurons")]
    pub inter_neurons: usize,

    #[serde(default = "default_command_neurons")]
    pub command_neurons: usize,

    #[serde(default = "default_motor_neurons")]
    pub motor_neurons: usize,

    /// Seed for weight init and wiring
    #[serde(default = "default_model_seed")]
    pub seed: u64,

    /// Optional JSON file of frozen feature statistics (see `orbcast calibrate`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_path: Option<PathBuf>,
}

fn default_sensory_neurons() -> usize { defaults::SENSORY_NEURONS }
fn default_inter_neurons() -> usize { defaults::INTER_NEURONS }
fn default_command_neurons() -> usize { defaults::COMMAND_NEURONS }
fn default_motor_neurons() -> usize { defaults::MOTOR_NEURONS }
fn default_model_seed() -> u64 { defaults::MODEL_SEED }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            scope: ModelScope::default(),
            sensory_neurons: default_sensory_neurons(),
            inter_neurons: default_inter_neurons(),
            command_neurons: default_command_neurons(),
            motor_neurons: default_motor_neurons(),
            seed: default_model_seed(),
            stats_path: None,
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyMethod {
    /// Per-feature residual RMS tracked during training
    #[default]
    Residual,
    /// Constant sigma for every feature
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceConfig {
    #[serde(default)]
    pub uncertainty: UncertaintyMethod,

    #[serde(default = "default_fixed_sigma")]
    pub fixed_sigma: f64,

    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

fn default_fixed_sigma() -> f64 { defaults::FIXED_SIGMA }
fn default_confidence_level() -> f64 { defaults::CONFIDENCE_LEVEL }

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            uncertainty: UncertaintyMethod::default(),
            fixed_sigma: default_fixed_sigma(),
            confidence_level: default_confidence_level(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(defaults::STORAGE_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `ORBCAST_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}
