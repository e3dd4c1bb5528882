//! Forecast outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable forecast for one satellite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub satellite_id: String,
    /// Time the forecast refers to
    pub for_timestamp: DateTime<Utc>,
    pub produced_at: DateTime<Utc>,
    /// Version of the model state that produced it
    pub model_version: u64,
    /// Registry slot of that model ("shared" or "satellite/<id>")
    pub model_key: String,
    pub schema_fingerprint: String,
    /// Standardized values in schema order
    pub forecast_vector: Vec<f64>,
    /// Same values in physical units (angles in radians)
    pub forecast_physical: Vec<f64>,
    /// Per-feature one-sigma uncertainty, standardized units
    pub uncertainty: Vec<f64>,
    /// Interval bounds at `confidence_level`, standardized units
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub confidence_level: f64,
    /// Age of the newest observation behind this forecast at `produced_at`
    pub staleness_secs: f64,
    /// The newest input observation had no fresh space-weather sample
    pub stale_weather: bool,
}

impl Prediction {
    /// Root-mean-square of the per-feature uncertainty.
    pub fn scalar_uncertainty(&self) -> f64 {
        if self.uncertainty.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self.uncertainty.iter().map(|u| u * u).sum();
        (sum_sq / self.uncertainty.len() as f64).sqrt()
    }
}
