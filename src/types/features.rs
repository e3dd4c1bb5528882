//! Feature schema and normalized feature vectors.
//!
//! The schema fixes feature order, physical bounds and the frozen
//! normalization statistics. Its fingerprint travels with every vector and
//! every model state so that data normalized one way is never fed to a model
//! trained another way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of features in the default schema.
pub const FEATURE_COUNT: usize = 12;

/// Feature names in schema order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Orbital elements (from TLE)
    "mean_motion", "eccentricity", "inclination", "raan",
    "arg_perigee", "mean_anomaly", "bstar",
    // Space weather (from OMNI, as-of joined)
    "solar_flux", "bz_gsm", "sym_h", "sw_speed",
    // Identity
    "satellite_code",
];

/// Value stored for a feature that could not be observed: the schema mean,
/// i.e. zero after standardisation.
pub const WEATHER_SENTINEL: f64 = 0.0;

/// Smallest standard deviation accepted in frozen statistics.
pub const MIN_STD: f64 = 1e-8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Orbital,
    Weather,
    Identity,
}

impl FeatureKind {
    /// Loss weight of this kind of feature when it is a forecast target.
    pub const fn loss_weight(self) -> f64 {
        match self {
            FeatureKind::Orbital => 2.0,
            FeatureKind::Weather => 1.0,
            FeatureKind::Identity => 0.0,
        }
    }
}

/// Physical validity range of a raw value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_true")]
    pub min_inclusive: bool,
    #[serde(default = "default_true")]
    pub max_inclusive: bool,
}

fn default_true() -> bool {
    true
}

impl Bounds {
    pub const fn closed(min: f64, max: f64) -> Self {
        Self { min, max, min_inclusive: true, max_inclusive: true }
    }

    /// `[min, max)`
    pub const fn half_open(min: f64, max: f64) -> Self {
        Self { min, max, min_inclusive: true, max_inclusive: false }
    }

    /// `(min, max]`
    pub const fn left_open(min: f64, max: f64) -> Self {
        Self { min, max, min_inclusive: false, max_inclusive: true }
    }

    pub fn contains(&self, v: f64) -> bool {
        let above = if self.min_inclusive { v >= self.min } else { v > self.min };
        let below = if self.max_inclusive { v <= self.max } else { v < self.max };
        above && below
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = if self.min_inclusive { '[' } else { '(' };
        let close = if self.max_inclusive { ']' } else { ')' };
        write!(f, "{open}{}, {}{close}", self.min, self.max)
    }
}

/// Frozen mean/std of one feature, in converted physical units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
    /// Unit after conversion
    pub unit: String,
    /// Raw value given in degrees, converted to radians
    pub angular: bool,
    /// Checked on the raw (unconverted) value
    pub bounds: Bounds,
    pub stats: FeatureStats,
}

impl FeatureSpec {
    fn new(
        name: &str,
        kind: FeatureKind,
        unit: &str,
        angular: bool,
        bounds: Bounds,
        mean: f64,
        std: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            unit: unit.to_string(),
            angular,
            bounds,
            stats: FeatureStats { mean, std },
        }
    }

    /// Raw value to physical units (degrees become radians).
    pub fn to_physical(&self, raw: f64) -> f64 {
        if self.angular {
            raw.to_radians()
        } else {
            raw
        }
    }

    pub fn standardize(&self, physical: f64) -> f64 {
        (physical - self.stats.mean) / self.stats.std.max(MIN_STD)
    }

    pub fn destandardize(&self, normalized: f64) -> f64 {
        normalized.mul_add(self.stats.std.max(MIN_STD), self.stats.mean)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error("expected {expected} feature statistics, got {got}")]
    StatsLength { expected: usize, got: usize },
    #[error("feature '{name}' has invalid statistics (mean={mean}, std={std})")]
    InvalidStats { name: String, mean: f64, std: f64 },
    #[error("schema fingerprint mismatch: stored {stored}, computed {computed}")]
    FingerprintMismatch { stored: String, computed: String },
}

/// Ordered feature list plus frozen normalization statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSchema {
    pub features: Vec<FeatureSpec>,
    pub fingerprint: String,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        use std::f64::consts::PI;
        use FeatureKind::{Identity, Orbital, Weather};

        let features = vec![
            FeatureSpec::new("mean_motion", Orbital, "rev/day", false, Bounds::left_open(0.0, 20.0), 14.5, 1.5),
            FeatureSpec::new("eccentricity", Orbital, "", false, Bounds::half_open(0.0, 1.0), 0.005, 0.02),
            FeatureSpec::new("inclination", Orbital, "rad", true, Bounds::closed(0.0, 180.0), 1.0, 0.5),
            FeatureSpec::new("raan", Orbital, "rad", true, Bounds::half_open(0.0, 360.0), PI, 1.8),
            FeatureSpec::new("arg_perigee", Orbital, "rad", true, Bounds::half_open(0.0, 360.0), PI, 1.8),
            FeatureSpec::new("mean_anomaly", Orbital, "rad", true, Bounds::half_open(0.0, 360.0), PI, 1.8),
            FeatureSpec::new("bstar", Orbital, "1/earth_radii", false, Bounds::closed(-1.0, 1.0), 1e-4, 5e-4),
            FeatureSpec::new("solar_flux", Weather, "sfu", false, Bounds::half_open(0.0, 1000.0), 120.0, 50.0),
            FeatureSpec::new("bz_gsm", Weather, "nT", false, Bounds::closed(-200.0, 200.0), 0.0, 3.0),
            FeatureSpec::new("sym_h", Weather, "nT", false, Bounds::closed(-2000.0, 500.0), -10.0, 20.0),
            FeatureSpec::new("sw_speed", Weather, "km/s", false, Bounds::closed(0.0, 3000.0), 420.0, 100.0),
            FeatureSpec::new("satellite_code", Identity, "", false, Bounds::closed(-1.0, 1.0), 0.0, 1.0),
        ];
        Self::from_features(features)
    }
}

impl FeatureSchema {
    pub fn from_features(features: Vec<FeatureSpec>) -> Self {
        let fingerprint = compute_fingerprint(&features);
        Self { features, fingerprint }
    }

    /// Same features with new frozen statistics. Produces a new fingerprint.
    pub fn with_stats(&self, stats: &[FeatureStats]) -> Result<Self, SchemaError> {
        if stats.len() != self.features.len() {
            return Err(SchemaError::StatsLength {
                expected: self.features.len(),
                got: stats.len(),
            });
        }
        let mut features = self.features.clone();
        for (spec, s) in features.iter_mut().zip(stats) {
            if !s.mean.is_finite() || !s.std.is_finite() || s.std < MIN_STD {
                return Err(SchemaError::InvalidStats {
                    name: spec.name.clone(),
                    mean: s.mean,
                    std: s.std,
                });
            }
            spec.stats = *s;
        }
        Ok(Self::from_features(features))
    }

    /// Check that the stored fingerprint matches the contents.
    pub fn verify(&self) -> Result<(), SchemaError> {
        let computed = compute_fingerprint(&self.features);
        if computed == self.fingerprint {
            Ok(())
        } else {
            Err(SchemaError::FingerprintMismatch {
                stored: self.fingerprint.clone(),
                computed,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    pub fn stats(&self) -> Vec<FeatureStats> {
        self.features.iter().map(|f| f.stats).collect()
    }

    /// Per-feature loss weights in schema order.
    pub fn loss_weights(&self) -> Vec<f64> {
        self.features.iter().map(|f| f.kind.loss_weight()).collect()
    }

    /// Normalized vector back to physical units.
    pub fn destandardize(&self, normalized: &[f64]) -> Vec<f64> {
        self.features
            .iter()
            .zip(normalized)
            .map(|(spec, &v)| spec.destandardize(v))
            .collect()
    }
}

fn compute_fingerprint(features: &[FeatureSpec]) -> String {
    let mut ctx = md5::Context::new();
    for f in features {
        ctx.consume(f.name.as_bytes());
        ctx.consume([f.angular as u8]);
        for v in [f.bounds.min, f.bounds.max, f.stats.mean, f.stats.std] {
            ctx.consume(v.to_bits().to_be_bytes());
        }
        ctx.consume([f.bounds.min_inclusive as u8, f.bounds.max_inclusive as u8]);
    }
    format!("{:x}", ctx.compute())
}

/// Deterministic identity code in `[-1, 1]` for a satellite id.
pub fn satellite_code(satellite_id: &str) -> f64 {
    let digest = md5::compute(satellite_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.0[..8]);
    let unit = u64::from_be_bytes(head) as f64 / u64::MAX as f64;
    unit.mul_add(2.0, -1.0)
}

/// What the normalizer did to produce a vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureMeta {
    pub schema_fingerprint: String,
    /// No OMNI sample within the staleness limit was available
    pub stale_weather: bool,
    /// Observation time of the joined OMNI sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_observed_at: Option<DateTime<Utc>>,
    /// Features holding [`WEATHER_SENTINEL`] instead of an observation
    #[serde(default)]
    pub filled: Vec<String>,
    /// Features whose units were converted (deg -> rad)
    #[serde(default)]
    pub converted: Vec<String>,
}

/// One normalized observation of one satellite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub satellite_id: String,
    pub timestamp: DateTime<Utc>,
    /// Standardized values in schema order
    pub values: Vec<f64>,
    pub meta: FeatureMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_matches_names() {
        let schema = FeatureSchema::default();
        let names: Vec<&str> = schema.names().collect();
        assert_eq!(names, FEATURE_NAMES);
        assert!(schema.verify().is_ok());
    }

    #[test]
    fn test_with_stats_changes_fingerprint() {
        let schema = FeatureSchema::default();
        let mut stats = schema.stats();
        stats[7].mean = 150.0;
        let other = schema.with_stats(&stats).unwrap();
        assert_ne!(schema.fingerprint, other.fingerprint);
        assert!(other.verify().is_ok());
    }

    #[test]
    fn test_with_stats_rejects_zero_std() {
        let schema = FeatureSchema::default();
        let mut stats = schema.stats();
        stats[0].std = 0.0;
        assert!(matches!(
            schema.with_stats(&stats),
            Err(SchemaError::InvalidStats { .. })
        ));
    }

    #[test]
    fn test_tampered_schema_fails_verify() {
        let mut schema = FeatureSchema::default();
        schema.features[0].stats.mean = 1.0;
        assert!(schema.verify().is_err());
    }

    #[test]
    fn test_bounds() {
        assert!(Bounds::half_open(0.0, 1.0).contains(0.0));
        assert!(!Bounds::half_open(0.0, 1.0).contains(1.0));
        assert!(!Bounds::left_open(0.0, 20.0).contains(0.0));
        assert!(Bounds::left_open(0.0, 20.0).contains(20.0));
        assert!(!Bounds::closed(0.0, 1.0).contains(f64::NAN));
    }

    #[test]
    fn test_satellite_code_stable_and_bounded() {
        let a = satellite_code("25544");
        assert_eq!(a, satellite_code("25544"));
        assert_ne!(a, satellite_code("43013"));
        assert!((-1.0..=1.0).contains(&a));
    }

    #[test]
    fn test_standardize_roundtrip() {
        let schema = FeatureSchema::default();
        let spec = &schema.features[7];
        let z = spec.standardize(170.0);
        assert!((z - 1.0).abs() < 1e-12);
        assert!((spec.destandardize(z) - 170.0).abs() < 1e-9);
    }
}
