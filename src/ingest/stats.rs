//! Running feature statistics using Welford's algorithm.
//!
//! Used offline to derive frozen normalization statistics for a new schema
//! from a sample of raw records. Each feature keeps its own count because
//! records rarely carry every field.

use serde::{Deserialize, Serialize};

use super::normalizer::{physical_fields, Rejection};
use crate::types::{
    satellite_code, FeatureKind, FeatureSchema, FeatureStats, FeedRecord, SchemaError, MIN_STD,
};

/// Samples a feature needs before its observed statistics replace the prior.
pub const MIN_SAMPLES_PER_FEATURE: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsAccumulator {
    count: Vec<u64>,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl StatsAccumulator {
    pub fn new(features: usize) -> Self {
        Self {
            count: vec![0; features],
            mean: vec![0.0; features],
            m2: vec![0.0; features],
        }
    }

    pub fn for_schema(schema: &FeatureSchema) -> Self {
        Self::new(schema.len())
    }

    /// Add one physical value of feature `index`.
    pub fn observe(&mut self, index: usize, x: f64) {
        if index >= self.count.len() || !x.is_finite() {
            return;
        }
        self.count[index] += 1;
        let n = self.count[index] as f64;
        let delta = x - self.mean[index];
        self.mean[index] += delta / n;
        let delta2 = x - self.mean[index];
        self.m2[index] += delta * delta2;
    }

    /// Validate a raw record and add its physical values.
    pub fn observe_record(
        &mut self,
        schema: &FeatureSchema,
        record: &FeedRecord,
    ) -> Result<(), Rejection> {
        let fields = physical_fields(schema, record)?;
        for (name, value) in &fields.values {
            if let Some(i) = schema.index_of(name) {
                self.observe(i, *value);
            }
        }
        if let (Some(id), Some(i)) = (
            record.satellite_id.as_deref(),
            schema
                .features
                .iter()
                .position(|f| f.kind == FeatureKind::Identity),
        ) {
            self.observe(i, satellite_code(id));
        }
        Ok(())
    }

    pub fn count(&self, index: usize) -> u64 {
        self.count.get(index).copied().unwrap_or(0)
    }

    /// Sample statistics of feature `index`, if enough samples were seen.
    pub fn stats(&self, index: usize) -> Option<FeatureStats> {
        let n = self.count(index);
        if n < MIN_SAMPLES_PER_FEATURE {
            return None;
        }
        let variance = self.m2[index] / (n as f64 - 1.0);
        Some(FeatureStats {
            mean: self.mean[index],
            std: variance.sqrt().max(MIN_STD),
        })
    }

    /// New schema with observed statistics where available and the prior
    /// schema's statistics elsewhere. Identity features keep their prior.
    pub fn freeze(&self, prior: &FeatureSchema) -> Result<FeatureSchema, SchemaError> {
        let stats: Vec<FeatureStats> = prior
            .features
            .iter()
            .enumerate()
            .map(|(i, spec)| match spec.kind {
                FeatureKind::Identity => spec.stats,
                _ => self.stats(i).unwrap_or(spec.stats),
            })
            .collect();
        prior.with_stats(&stats)
    }
}
