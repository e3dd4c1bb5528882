//! Fixed-length, gap-free observation windows for one satellite.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::FeatureVector;

/// Bounds on the per-step `dt` fed to the recurrent cell, in units of the
/// window's median interval.
const DT_MIN: f64 = 0.05;
const DT_MAX: f64 = 20.0;

/// Exactly `window_size` consecutive vectors of one satellite, timestamps
/// strictly increasing, no gap above `max_gap`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Window {
    pub satellite_id: String,
    pub vectors: Vec<FeatureVector>,
    /// Timestamp of the observation immediately preceding the window, if the
    /// buffer still holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_in: Option<DateTime<Utc>>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Fingerprint of the schema the vectors were normalized with.
    pub fn schema_fingerprint(&self) -> &str {
        self.vectors
            .first()
            .map_or("", |v| v.meta.schema_fingerprint.as_str())
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.vectors.first().map(|v| v.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.vectors.last().map(|v| v.timestamp)
    }

    /// Training split: the first `len - horizon` vectors are the model input,
    /// the last vector is the target.
    pub fn training_split(&self, horizon: usize) -> Option<(&[FeatureVector], &FeatureVector)> {
        let input_len = self.vectors.len().checked_sub(horizon)?;
        if input_len == 0 {
            return None;
        }
        let target = self.vectors.last()?;
        Some((&self.vectors[..input_len], target))
    }

    /// The newest `input_len` vectors, used as model input at prediction time.
    pub fn prediction_input(&self, input_len: usize) -> &[FeatureVector] {
        let start = self.vectors.len().saturating_sub(input_len);
        &self.vectors[start..]
    }

    /// Median spacing between consecutive observations.
    pub fn median_step(&self) -> Option<Duration> {
        let mut steps: Vec<Duration> = self
            .vectors
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect();
        if steps.is_empty() {
            return None;
        }
        steps.sort();
        Some(steps[steps.len() / 2])
    }

    /// Per-step `dt` for `vectors[start..end]`, in units of the median step.
    ///
    /// The first element's `dt` is measured from its predecessor: the
    /// previous window vector, the lead-in observation, or one median step
    /// when neither exists.
    pub fn step_dts(&self, start: usize, end: usize) -> Vec<f64> {
        let median = self
            .median_step()
            .map_or(1.0, |d| duration_secs(d).max(f64::EPSILON));
        (start..end.min(self.vectors.len()))
            .map(|i| {
                let prev = if i == 0 {
                    self.lead_in
                } else {
                    Some(self.vectors[i - 1].timestamp)
                };
                prev.map_or(1.0, |p| {
                    (duration_secs(self.vectors[i].timestamp - p) / median).clamp(DT_MIN, DT_MAX)
                })
            })
            .collect()
    }
}

/// Seconds in a chrono duration, with sub-second precision.
pub fn duration_secs(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}
