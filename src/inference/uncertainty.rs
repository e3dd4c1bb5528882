//! Uncertainty attached to every forecast.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::{InferenceConfig, UncertaintyMethod};
use crate::model::ModelState;

/// Per-feature one-sigma uncertainty, standardized units.
pub trait UncertaintyEstimator: Send + Sync {
    fn sigma(&self, state: &ModelState, horizon: usize) -> Vec<f64>;

    fn name(&self) -> &'static str;
}

/// RMS of the model's own training residuals, grown with `sqrt(horizon)`.
/// Before any training step this is the calibration prior.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResidualEstimator;

impl UncertaintyEstimator for ResidualEstimator {
    fn sigma(&self, state: &ModelState, horizon: usize) -> Vec<f64> {
        let growth = (horizon.max(1) as f64).sqrt();
        state
            .parameters
            .calibration
            .sigma()
            .into_iter()
            .map(|s| s * growth)
            .collect()
    }

    fn name(&self) -> &'static str {
        "residual"
    }
}

/// The same sigma for every feature and horizon.
#[derive(Debug, Clone, Copy)]
pub struct FixedCalibration {
    pub sigma: f64,
}

impl UncertaintyEstimator for FixedCalibration {
    fn sigma(&self, state: &ModelState, _horizon: usize) -> Vec<f64> {
        vec![self.sigma; state.schema.len()]
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

pub fn estimator_from_config(config: &InferenceConfig) -> Box<dyn UncertaintyEstimator> {
    match config.uncertainty {
        UncertaintyMethod::Residual => Box::new(ResidualEstimator),
        UncertaintyMethod::Fixed => Box::new(FixedCalibration {
            sigma: config.fixed_sigma,
        }),
    }
}

/// Two-sided standard normal quantile for `confidence_level`, e.g. 1.96 for
/// 0.95. Levels outside (0, 1) fall back to one sigma.
pub fn z_score(confidence_level: f64) -> f64 {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return 1.0;
    }
    Normal::new(0.0, 1.0).map_or(1.0, |n| n.inverse_cdf(0.5 + confidence_level / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_score() {
        assert!((z_score(0.95) - 1.959_964).abs() < 1e-4);
        assert!((z_score(0.6827) - 1.0).abs() < 1e-3);
        assert_eq!(z_score(1.5), 1.0);
    }

    #[test]
    fn test_estimator_from_config() {
        let fixed = estimator_from_config(&InferenceConfig {
            uncertainty: UncertaintyMethod::Fixed,
            fixed_sigma: 0.3,
            ..InferenceConfig::default()
        });
        assert_eq!(fixed.name(), "fixed");
        assert_eq!(estimator_from_config(&InferenceConfig::default()).name(), "residual");
    }
}
