//! Residual statistics carried with every model version.

use serde::{Deserialize, Serialize};

use crate::config::defaults;

/// Sigma reported before any residual has been observed.
pub const PRIOR_SIGMA: f64 = 1.0;

/// Floor on reported sigma.
const MIN_SIGMA: f64 = 1e-6;

/// Per-feature exponential moving average of squared training residuals.
///
/// Residuals are in standardized units, so `sigma` is too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResidualCalibration {
    pub alpha: f64,
    mean_sq: Vec<f64>,
    pub observations: u64,
}

impl ResidualCalibration {
    pub fn new(features: usize) -> Self {
        Self {
            alpha: defaults::RESIDUAL_EMA_ALPHA,
            mean_sq: vec![PRIOR_SIGMA * PRIOR_SIGMA; features],
            observations: 0,
        }
    }

    /// Fold one example's residuals (`prediction - target`) into the EMA.
    /// Non-finite residuals are ignored.
    pub fn observe(&mut self, residuals: &[f64]) {
        if residuals.len() != self.mean_sq.len() || residuals.iter().any(|r| !r.is_finite()) {
            return;
        }
        for (ms, r) in self.mean_sq.iter_mut().zip(residuals) {
            *ms = (1.0 - self.alpha).mul_add(*ms, self.alpha * r * r);
        }
        self.observations += 1;
    }

    /// One-step sigma per feature.
    pub fn sigma(&self) -> Vec<f64> {
        self.mean_sq.iter().map(|ms| ms.sqrt().max(MIN_SIGMA)).collect()
    }

    pub fn len(&self) -> usize {
        self.mean_sq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean_sq.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prior_before_observations() {
        let cal = ResidualCalibration::new(3);
        assert_eq!(cal.sigma(), vec![PRIOR_SIGMA; 3]);
        assert_eq!(cal.observations, 0);
    }

    #[test]
    fn test_ema_converges_toward_residual_rms() {
        let mut cal = ResidualCalibration::new(2);
        for _ in 0..500 {
            cal.observe(&[0.1, -0.1]);
        }
        let sigma = cal.sigma();
        assert!((sigma[0] - 0.1).abs() < 1e-3);
        assert!((sigma[1] - 0.1).abs() < 1e-3);
        assert_eq!(cal.observations, 500);
    }

    #[test]
    fn test_rejects_bad_residuals() {
        let mut cal = ResidualCalibration::new(2);
        cal.observe(&[f64::NAN, 0.0]);
        cal.observe(&[0.0]);
        assert_eq!(cal.observations, 0);
    }
}
