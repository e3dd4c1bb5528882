//! Record processing loop shared by every input mode.
//!
//! Drains a [`RecordSource`] into the coordinator until the source is
//! exhausted or the shutdown token fires.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::coordinator::{IngestOutcome, PipelineCoordinator};
use super::source::{RecordEvent, RecordSource};

/// Progress is logged every this many records.
const PROGRESS_INTERVAL: u64 = 1_000;

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LoopStats {
    pub records: u64,
    pub rejected: u64,
    pub weather_samples: u64,
    pub windows_committed: u64,
    pub windows_invalidated: u64,
    pub windows_dropped: u64,
}

impl LoopStats {
    fn count(&mut self, outcome: &IngestOutcome) {
        self.records += 1;
        match outcome {
            IngestOutcome::Rejected { .. } => self.rejected += 1,
            IngestOutcome::WeatherUpdated { .. } => self.weather_samples += 1,
            IngestOutcome::Buffered { .. } => {}
            IngestOutcome::WindowCommitted { dropped_pending, .. } => {
                self.windows_committed += 1;
                if *dropped_pending {
                    self.windows_dropped += 1;
                }
            }
            IngestOutcome::WindowInvalidated { .. } => self.windows_invalidated += 1,
        }
    }
}

pub struct ProcessingLoop {
    coordinator: PipelineCoordinator,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub const fn new(coordinator: PipelineCoordinator, cancel_token: CancellationToken) -> Self {
        Self {
            coordinator,
            cancel_token,
        }
    }

    /// Run until the source ends or cancellation. Hands the coordinator
    /// back so callers can drain training or keep serving predictions.
    pub async fn run<S: RecordSource>(mut self, source: &mut S) -> (PipelineCoordinator, LoopStats) {
        let mut stats = LoopStats::default();
        info!(source = source.source_name(), "Processing feed records");

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received, stopping ingestion");
                    break;
                }
                result = source.next_record() => match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(source = source.source_name(), error = %e, "Source error");
                        break;
                    }
                }
            };

            let record = match event {
                RecordEvent::Record(record) => record,
                RecordEvent::Eof => {
                    info!(records = stats.records, "Source reached end");
                    break;
                }
            };

            let outcome = self.coordinator.ingest(&record);
            stats.count(&outcome);

            if stats.records % PROGRESS_INTERVAL == 0 {
                let counts = self.coordinator.events().counts();
                info!(
                    records = stats.records,
                    windows = stats.windows_committed,
                    rejected = counts.record_rejected,
                    published = counts.model_published,
                    "Progress"
                );
            }
        }

        info!(
            records = stats.records,
            rejected = stats.rejected,
            weather = stats.weather_samples,
            windows = stats.windows_committed,
            invalidated = stats.windows_invalidated,
            dropped = stats.windows_dropped,
            "Ingestion finished"
        );
        (self.coordinator, stats)
    }
}
