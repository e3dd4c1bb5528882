//! On-demand forecasting with uncertainty and staleness.

mod predictor;
mod uncertainty;

pub use predictor::{Predictor, Unavailable};
pub use uncertainty::{
    estimator_from_config, z_score, FixedCalibration, ResidualEstimator, UncertaintyEstimator,
};
