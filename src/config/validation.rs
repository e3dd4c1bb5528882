//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization and range checks, which are fatal.

use std::collections::HashSet;

use super::defaults::MAX_DURATION_SECS;
use super::ForecastConfig;
use crate::types::FEATURE_COUNT;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `ForecastConfig`.
///
/// Maintained by hand to match the struct hierarchy in forecast_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [pipeline]
        "pipeline",
        "pipeline.window_size",
        "pipeline.forecast_horizon",
        "pipeline.max_gap_secs",
        "pipeline.max_omni_staleness_secs",
        "pipeline.backpressure_queue_capacity",
        "pipeline.prediction_history",
        // [training]
        "training",
        "training.replay_buffer_size",
        "training.batch_size",
        "training.replay_sampling",
        "training.bptt_depth",
        "training.learning_rate",
        "training.lr_decay",
        "training.lr_floor",
        "training.max_grad_norm",
        "training.max_param_norm",
        "training.seed",
        // [model]
        "model",
        "model.scope",
        "model.sensory_neurons",
        "model.inter_neurons",
        "model.command_neurons",
        "model.motor_neurons",
        "model.seed",
        "model.stats_path",
        // [inference]
        "inference",
        "inference.uncertainty",
        "inference.fixed_sigma",
        "inference.confidence_level",
        // [storage]
        "storage",
        "storage.backend",
        "storage.path",
        // [server]
        "server",
        "server.addr",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new(); // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Range checks on a parsed config.
///
/// Returns (errors, warnings): errors must prevent startup; warnings are
/// suspicious but workable.
pub fn validate_ranges(config: &ForecastConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let p = &config.pipeline;
    let t = &config.training;
    let i = &config.inference;

    if p.window_size < 2 {
        errors.push(format!("pipeline.window_size = {} must be >= 2", p.window_size));
    }
    if p.forecast_horizon < 1 || p.forecast_horizon >= p.window_size {
        errors.push(format!(
            "pipeline.forecast_horizon = {} must be in [1, window_size - 1] (window_size = {})",
            p.forecast_horizon, p.window_size
        ));
    }
    check_duration("pipeline.max_gap_secs", p.max_gap_secs, &mut errors);
    check_duration(
        "pipeline.max_omni_staleness_secs",
        p.max_omni_staleness_secs,
        &mut errors,
    );
    if p.backpressure_queue_capacity == 0 {
        errors.push("pipeline.backpressure_queue_capacity must be > 0".to_string());
    }

    if t.batch_size == 0 {
        errors.push("training.batch_size must be > 0".to_string());
    }
    if t.replay_buffer_size == 0 {
        errors.push("training.replay_buffer_size must be > 0".to_string());
    }
    if t.bptt_depth == 0 {
        errors.push("training.bptt_depth must be > 0".to_string());
    }
    check_positive("training.learning_rate", t.learning_rate, &mut errors);
    check_positive("training.lr_floor", t.lr_floor, &mut errors);
    check_positive("training.max_grad_norm", t.max_grad_norm, &mut errors);
    check_positive("training.max_param_norm", t.max_param_norm, &mut errors);
    if !t.lr_decay.is_finite() || t.lr_decay <= 0.0 || t.lr_decay > 1.0 {
        errors.push(format!("training.lr_decay = {} must be in (0, 1]", t.lr_decay));
    }

    check_positive("inference.fixed_sigma", i.fixed_sigma, &mut errors);
    if !i.confidence_level.is_finite() || i.confidence_level <= 0.0 || i.confidence_level >= 1.0 {
        errors.push(format!(
            "inference.confidence_level = {} must be in (0, 1)",
            i.confidence_level
        ));
    }

    if t.replay_buffer_size + 1 < t.batch_size {
        warnings.push(ValidationWarning {
            field: "training.replay_buffer_size".to_string(),
            message: format!(
                "replay_buffer_size = {} can never fill a batch of {}",
                t.replay_buffer_size, t.batch_size
            ),
            suggestion: None,
        });
    }
    if p.max_omni_staleness_secs > p.max_gap_secs {
        warnings.push(ValidationWarning {
            field: "pipeline.max_omni_staleness_secs".to_string(),
            message: format!(
                "max_omni_staleness_secs = {} exceeds max_gap_secs = {}",
                p.max_omni_staleness_secs, p.max_gap_secs
            ),
            suggestion: None,
        });
    }
    if t.lr_floor > t.learning_rate {
        warnings.push(ValidationWarning {
            field: "training.lr_floor".to_string(),
            message: format!(
                "lr_floor = {} is above learning_rate = {}",
                t.lr_floor, t.learning_rate
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

/// Network shape checks: every feature needs a sensory neuron and every
/// layer needs at least one neuron.
pub fn validate_network_shape(config: &ForecastConfig) -> Vec<String> {
    let m = &config.model;
    let mut errors = Vec::new();
    if m.sensory_neurons < FEATURE_COUNT {
        errors.push(format!(
            "model.sensory_neurons = {} must be >= feature count ({FEATURE_COUNT})",
            m.sensory_neurons
        ));
    }
    for (name, count) in [
        ("model.inter_neurons", m.inter_neurons),
        ("model.command_neurons", m.command_neurons),
        ("model.motor_neurons", m.motor_neurons),
    ] {
        if count == 0 {
            errors.push(format!("{name} must be > 0"));
        }
    }
    errors
}

fn check_positive(name: &str, value: f64, errors: &mut Vec<String>) {
    // NaN comparisons silently pass, so check finiteness explicitly
    if !value.is_finite() || value <= 0.0 {
        errors.push(format!("{name} = {value} must be finite and > 0"));
    }
}

fn check_duration(name: &str, value: u64, errors: &mut Vec<String>) {
    if value == 0 || value > MAX_DURATION_SECS {
        errors.push(format!("{name} = {value} must be in [1, {MAX_DURATION_SECS}]"));
    }
}

// ============================================================================
// Tests
// ============================================================================
