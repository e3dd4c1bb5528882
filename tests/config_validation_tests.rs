//! Config Validation Tests
//!
//! Typo detection, range validation and network shape checks, exercised
//! independently from the rest of the pipeline.

use orbcast::config::validation::{
    known_config_keys, suggest_correction, validate_network_shape, validate_ranges,
    validate_unknown_keys,
};
use orbcast::config::{
    ConfigError, ForecastConfig, ModelScope, ReplaySampling, StorageBackend, UncertaintyMethod,
};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_window_size_warns_with_suggestion() {
    let toml_str = r#"
[pipeline]
windw_size = 12
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("windw_size"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("pipeline.window_size"),
        "Should suggest the correct spelling"
    );
}

#[test]
fn unknown_section_warns_without_failing_load() {
    let toml_str = r#"
[telemetry]
endpoint = "http://localhost"
"#;
    assert_eq!(validate_unknown_keys(toml_str).len(), 2);
    let config = ForecastConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config, ForecastConfig::default());
}

#[test]
fn every_known_key_round_trips_without_warnings() {
    let rendered = ForecastConfig::default().to_toml().unwrap();
    assert!(validate_unknown_keys(&rendered).is_empty());
    let known = known_config_keys();
    assert!(known.contains("training.replay_sampling"));
    assert!(known.contains("inference.confidence_level"));
}

#[test]
fn distant_typo_gets_no_suggestion() {
    let known = known_config_keys();
    assert_eq!(suggest_correction("completely.unrelated.key", &known), None);
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn full_config_parses() {
    let toml_str = r#"
[pipeline]
window_size = 12
forecast_horizon = 2
max_gap_secs = 43200
max_omni_staleness_secs = 7200
backpressure_queue_capacity = 16

[training]
batch_size = 4
replay_sampling = "most_recent"
learning_rate = 0.002

[model]
scope = "per_satellite"
sensory_neurons = 16

[inference]
uncertainty = "fixed"
fixed_sigma = 0.5
confidence_level = 0.9

[storage]
backend = "memory"

[server]
addr = "127.0.0.1:9000"
"#;
    let config = ForecastConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.pipeline.window_size, 12);
    assert_eq!(config.pipeline.input_len(), 10);
    assert_eq!(config.pipeline.max_gap().num_hours(), 12);
    assert_eq!(config.training.replay_sampling, ReplaySampling::MostRecent);
    assert_eq!(config.model.scope, ModelScope::PerSatellite);
    assert_eq!(config.inference.uncertainty, UncertaintyMethod::Fixed);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.server.addr, "127.0.0.1:9000");
    // Untouched fields keep their defaults
    assert_eq!(config.training.bptt_depth, ForecastConfig::default().training.bptt_depth);
}

#[test]
fn malformed_toml_is_parse_error() {
    let err = ForecastConfig::from_toml_str("[pipeline\nwindow_size = 3").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)));
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn defaults_are_valid() {
    let config = ForecastConfig::default();
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty(), "{errors:?}");
    assert!(warnings.is_empty(), "{warnings:?}");
    assert!(validate_network_shape(&config).is_empty());
}

#[test]
fn horizon_must_fit_in_window() {
    let mut config = ForecastConfig::default();
    config.pipeline.window_size = 4;
    config.pipeline.forecast_horizon = 4;
    let (errors, _) = validate_ranges(&config);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("forecast_horizon"));
}

#[test]
fn nan_learning_rate_is_rejected() {
    let mut config = ForecastConfig::default();
    config.training.learning_rate = f64::NAN;
    let (errors, _) = validate_ranges(&config);
    assert!(errors.iter().any(|e| e.contains("training.learning_rate")));
}

#[test]
fn all_range_errors_are_collected() {
    let toml_str = r#"
[pipeline]
window_size = 1
backpressure_queue_capacity = 0

[inference]
confidence_level = 1.5
"#;
    match ForecastConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            // window_size, horizon (>= window), queue capacity, confidence
            assert_eq!(errors.len(), 4, "{errors:?}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn suspicious_values_only_warn() {
    let mut config = ForecastConfig::default();
    config.training.replay_buffer_size = 2;
    config.training.batch_size = 8;
    config.pipeline.max_omni_staleness_secs = config.pipeline.max_gap_secs + 1;
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert_eq!(warnings.len(), 2);
}

#[test]
fn too_few_sensory_neurons_is_rejected() {
    let mut config = ForecastConfig::default();
    config.model.sensory_neurons = 3;
    config.model.motor_neurons = 0;
    let errors = validate_network_shape(&config);
    assert_eq!(errors.len(), 2);
    assert!(config.validate().is_err());
}
