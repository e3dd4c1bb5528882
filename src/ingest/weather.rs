//! Bounded OMNI history with as-of lookup.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::RejectReason;

/// Space-weather fields, in the order stored in a [`WeatherSample`].
pub const WEATHER_FIELDS: [&str; 4] = ["solar_flux", "bz_gsm", "sym_h", "sw_speed"];

/// One OMNI observation in physical units; `None` = not measured.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherSample {
    pub values: [Option<f64>; 4],
}

impl WeatherSample {
    pub fn get(&self, field: &str) -> Option<f64> {
        WEATHER_FIELDS
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.values[i])
    }
}

/// OMNI samples keyed by observation time. Oldest samples are evicted past
/// `limit`.
#[derive(Debug, Clone)]
pub struct WeatherHistory {
    samples: BTreeMap<DateTime<Utc>, WeatherSample>,
    limit: usize,
}

impl WeatherHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            samples: BTreeMap::new(),
            limit: limit.max(1),
        }
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.samples.keys().next_back().copied()
    }

    /// Check a new observation time against the newest stored one.
    pub fn check_order(&self, observed_at: DateTime<Utc>) -> Result<(), RejectReason> {
        match self.latest() {
            Some(last) if observed_at == last => Err(RejectReason::DuplicateTimestamp),
            Some(last) if observed_at < last => Err(RejectReason::OutOfOrder),
            _ => Ok(()),
        }
    }

    pub fn insert(
        &mut self,
        observed_at: DateTime<Utc>,
        sample: WeatherSample,
    ) -> Result<(), RejectReason> {
        self.check_order(observed_at)?;
        self.samples.insert(observed_at, sample);
        while self.samples.len() > self.limit {
            self.samples.pop_first();
        }
        Ok(())
    }

    /// Newest sample observed at or before `at`.
    pub fn as_of(&self, at: DateTime<Utc>) -> Option<(DateTime<Utc>, &WeatherSample)> {
        self.samples.range(..=at).next_back().map(|(t, s)| (*t, s))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
