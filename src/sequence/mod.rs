//! Per-satellite sequence buffers.
//!
//! Each satellite owns a ring of `window_size + 1` normalized observations.
//! The extra slot keeps the observation preceding the current window so the
//! first window step still has a measured `dt`. A gap above `max_gap`
//! discards the ring; the observation that revealed the gap starts a fresh
//! fill.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::types::{FeatureVector, Window};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BufferPhase {
    Empty,
    Filling,
    Ready,
    /// The last push discarded the buffer; reported until the next push.
    Invalidated,
}

impl std::fmt::Display for BufferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferPhase::Empty => write!(f, "empty"),
            BufferPhase::Filling => write!(f, "filling"),
            BufferPhase::Ready => write!(f, "ready"),
            BufferPhase::Invalidated => write!(f, "invalidated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The buffer holds a full window (emitted on every in-order push once
    /// full, sliding by one observation)
    WindowReady(Window),
    WindowPending { filled: usize, needed: usize },
    /// Gap above `max_gap`: `discarded` observations dropped, the new one kept
    WindowInvalidated { gap: Duration, discarded: usize },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("satellite {satellite_id}: observation at {got} is not after {last}")]
    OutOfOrder {
        satellite_id: String,
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default)]
struct SatelliteBuffer {
    ring: VecDeque<FeatureVector>,
    invalidated: bool,
}

/// All per-satellite buffers. Owned by a single writer (the coordinator).
#[derive(Debug, Clone)]
pub struct SequenceBuffer {
    window_size: usize,
    max_gap: Duration,
    buffers: HashMap<String, SatelliteBuffer>,
}

impl SequenceBuffer {
    pub fn new(window_size: usize, max_gap: Duration) -> Self {
        Self {
            window_size,
            max_gap,
            buffers: HashMap::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.window_size, config.max_gap())
    }

    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn push(&mut self, vector: FeatureVector) -> Result<PushOutcome, BufferError> {
        let window_size = self.window_size;
        let buffer = self.buffers.entry(vector.satellite_id.clone()).or_default();

        if let Some(last) = buffer.ring.back().map(|v| v.timestamp) {
            if vector.timestamp <= last {
                return Err(BufferError::OutOfOrder {
                    satellite_id: vector.satellite_id,
                    last,
                    got: vector.timestamp,
                });
            }
            let gap = vector.timestamp - last;
            if gap > self.max_gap {
                let discarded = buffer.ring.len();
                warn!(
                    satellite = %vector.satellite_id,
                    gap_secs = gap.num_seconds(),
                    discarded,
                    "Observation gap exceeds limit, buffer invalidated"
                );
                buffer.ring.clear();
                buffer.ring.push_back(vector);
                buffer.invalidated = true;
                return Ok(PushOutcome::WindowInvalidated { gap, discarded });
            }
        }

        buffer.invalidated = false;
        buffer.ring.push_back(vector);
        while buffer.ring.len() > window_size + 1 {
            buffer.ring.pop_front();
        }

        let filled = buffer.ring.len().min(window_size);
        if filled < window_size {
            debug!(filled, needed = window_size, "Buffer filling");
            return Ok(PushOutcome::WindowPending {
                filled,
                needed: window_size,
            });
        }

        let skip = buffer.ring.len() - window_size;
        let lead_in = if skip > 0 {
            buffer.ring.front().map(|v| v.timestamp)
        } else {
            None
        };
        let vectors: Vec<FeatureVector> = buffer.ring.iter().skip(skip).cloned().collect();
        let satellite_id = vectors
            .first()
            .map(|v| v.satellite_id.clone())
            .unwrap_or_default();
        Ok(PushOutcome::WindowReady(Window {
            satellite_id,
            vectors,
            lead_in,
        }))
    }

    pub fn phase(&self, satellite_id: &str) -> BufferPhase {
        match self.buffers.get(satellite_id) {
            None => BufferPhase::Empty,
            Some(b) if b.invalidated => BufferPhase::Invalidated,
            Some(b) if b.ring.is_empty() => BufferPhase::Empty,
            Some(b) if b.ring.len() >= self.window_size => BufferPhase::Ready,
            Some(_) => BufferPhase::Filling,
        }
    }

    /// Observations counted toward the next window (at most `window_size`).
    pub fn filled(&self, satellite_id: &str) -> usize {
        self.buffers
            .get(satellite_id)
            .map_or(0, |b| b.ring.len().min(self.window_size))
    }

    pub fn last_observation(&self, satellite_id: &str) -> Option<DateTime<Utc>> {
        self.buffers
            .get(satellite_id)
            .and_then(|b| b.ring.back())
            .map(|v| v.timestamp)
    }

    pub fn satellites(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureMeta;
    use chrono::TimeZone;

    fn v(sat: &str, secs: i64) -> FeatureVector {
        FeatureVector {
            satellite_id: sat.into(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            values: vec![secs as f64],
            meta: FeatureMeta::default(),
        }
    }

    fn buffer() -> SequenceBuffer {
        SequenceBuffer::new(3, Duration::seconds(100))
    }

    #[test]
    fn test_fill_then_ready_then_slide() {
        let mut b = buffer();
        assert_eq!(b.phase("a"), BufferPhase::Empty);
        assert_eq!(
            b.push(v("a", 1)).unwrap(),
            PushOutcome::WindowPending { filled: 1, needed: 3 }
        );
        assert_eq!(b.phase("a"), BufferPhase::Filling);
        b.push(v("a", 2)).unwrap();
        let PushOutcome::WindowReady(w) = b.push(v("a", 3)).unwrap() else {
            panic!("expected window");
        };
        assert_eq!(w.len(), 3);
        assert!(w.lead_in.is_none());
        assert_eq!(b.phase("a"), BufferPhase::Ready);

        let PushOutcome::WindowReady(w) = b.push(v("a", 4)).unwrap() else {
            panic!("expected sliding window");
        };
        let times: Vec<f64> = w.vectors.iter().map(|x| x.values[0]).collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
        assert_eq!(w.lead_in, Some(Utc.timestamp_opt(1, 0).unwrap()));
    }

    #[test]
    fn test_out_of_order_leaves_buffer_unchanged() {
        let mut b = buffer();
        b.push(v("a", 10)).unwrap();
        b.push(v("a", 20)).unwrap();
        let err = b.push(v("a", 15)).unwrap_err();
        assert!(matches!(err, BufferError::OutOfOrder { .. }));
        assert!(b.push(v("a", 20)).is_err());
        assert_eq!(b.filled("a"), 2);
        assert_eq!(b.last_observation("a"), Some(Utc.timestamp_opt(20, 0).unwrap()));
    }

    #[test]
    fn test_gap_invalidates_and_restarts() {
        let mut b = buffer();
        b.push(v("a", 0)).unwrap();
        b.push(v("a", 50)).unwrap();
        let outcome = b.push(v("a", 500)).unwrap();
        assert_eq!(
            outcome,
            PushOutcome::WindowInvalidated {
                gap: Duration::seconds(450),
                discarded: 2
            }
        );
        assert_eq!(b.phase("a"), BufferPhase::Invalidated);
        assert_eq!(b.filled("a"), 1);
        assert_eq!(
            b.push(v("a", 510)).unwrap(),
            PushOutcome::WindowPending { filled: 2, needed: 3 }
        );
        assert_eq!(b.phase("a"), BufferPhase::Filling);
    }

    #[test]
    fn test_gap_at_limit_is_allowed() {
        let mut b = buffer();
        b.push(v("a", 0)).unwrap();
        assert!(matches!(
            b.push(v("a", 100)).unwrap(),
            PushOutcome::WindowPending { filled: 2, .. }
        ));
    }

    #[test]
    fn test_satellites_independent() {
        let mut b = buffer();
        for t in 1..=3 {
            b.push(v("a", t)).unwrap();
        }
        b.push(v("b", 1)).unwrap();
        assert_eq!(b.phase("a"), BufferPhase::Ready);
        assert_eq!(b.phase("b"), BufferPhase::Filling);
        // Old timestamps for a fresh satellite are fine
        assert!(b.push(v("c", 0)).is_ok());
    }
}
