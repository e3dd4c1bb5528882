//! Read model of per-satellite buffer state and committed windows.
//!
//! The coordinator is the only writer. The predictor and the status API read
//! it concurrently; every lock is held only to clone or replace an entry.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sequence::BufferPhase;
use crate::types::Window;

#[derive(Debug, Clone)]
struct Entry {
    phase: BufferPhase,
    filled: usize,
    last_observation: Option<DateTime<Utc>>,
    invalidations: u64,
    latest_window: Option<Arc<Window>>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            phase: BufferPhase::Empty,
            filled: 0,
            last_observation: None,
            invalidations: 0,
            latest_window: None,
        }
    }
}

/// Buffer state of one satellite as reported by `/status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SatelliteStatus {
    pub satellite_id: String,
    pub phase: BufferPhase,
    pub filled: usize,
    pub last_observation: Option<DateTime<Utc>>,
    pub invalidations: u64,
    /// Last timestamp of the newest committed window
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct WindowBoard {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl WindowBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, satellite_id: &str, f: impl FnOnce(&mut Entry)) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        f(entries.entry(satellite_id.to_string()).or_default());
    }

    /// Record the buffer state after a push.
    pub fn record(
        &self,
        satellite_id: &str,
        phase: BufferPhase,
        filled: usize,
        last_observation: Option<DateTime<Utc>>,
    ) {
        self.update(satellite_id, |e| {
            e.phase = phase;
            e.filled = filled;
            e.last_observation = last_observation;
        });
    }

    /// Make `window` the newest committed window of its satellite.
    pub fn commit(&self, window: Arc<Window>) {
        let id = window.satellite_id.clone();
        self.update(&id, |e| e.latest_window = Some(window));
    }

    /// Count an invalidation. The committed window is dropped: it no longer
    /// describes a contiguous recent history.
    pub fn invalidate(&self, satellite_id: &str) {
        self.update(satellite_id, |e| {
            e.invalidations += 1;
            e.latest_window = None;
        });
    }

    pub fn latest_window(&self, satellite_id: &str) -> Option<Arc<Window>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(satellite_id).and_then(|e| e.latest_window.clone())
    }

    pub fn status(&self, satellite_id: &str) -> Option<SatelliteStatus> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(satellite_id).map(|e| to_status(satellite_id, e))
    }

    /// Every known satellite, ordered by id.
    pub fn statuses(&self) -> Vec<SatelliteStatus> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(id, e)| to_status(id, e)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_status(satellite_id: &str, e: &Entry) -> SatelliteStatus {
    SatelliteStatus {
        satellite_id: satellite_id.to_string(),
        phase: e.phase,
        filled: e.filled,
        last_observation: e.last_observation,
        invalidations: e.invalidations,
        window_end: e.latest_window.as_ref().and_then(|w| w.last_timestamp()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(id: &str) -> Arc<Window> {
        Arc::new(Window {
            satellite_id: id.into(),
            vectors: Vec::new(),
            lead_in: None,
        })
    }

    #[test]
    fn test_commit_and_invalidate() {
        let board = WindowBoard::new();
        board.record("A", BufferPhase::Ready, 5, None);
        board.commit(window("A"));
        assert!(board.latest_window("A").is_some());

        board.invalidate("A");
        board.record("A", BufferPhase::Invalidated, 1, None);
        assert!(board.latest_window("A").is_none());
        let status = board.status("A").unwrap();
        assert_eq!(status.invalidations, 1);
        assert_eq!(status.phase, BufferPhase::Invalidated);
    }

    #[test]
    fn test_statuses_sorted_by_id() {
        let board = WindowBoard::new();
        board.record("B", BufferPhase::Filling, 1, None);
        board.record("A", BufferPhase::Filling, 2, None);
        let ids: Vec<_> = board.statuses().into_iter().map(|s| s.satellite_id).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(board.status("C").is_none());
    }
}
