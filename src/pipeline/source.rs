//! Record source abstraction for feed ingestion.
//!
//! Provides a unified trait for reading FeedRecords from different sources:
//! JSON lines (file or stdin) and pre-loaded replays of parsed TLE / OMNI
//! files.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::types::{FeedRecord, FeedSource};

/// Events produced by a record source.
pub enum RecordEvent {
    /// A well-formed record was read.
    Record(FeedRecord),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where feed records come from.
///
/// The processing loop calls [`next_record`](RecordSource::next_record) in a
/// `select!` with cancellation.
#[async_trait]
pub trait RecordSource: Send + 'static {
    /// Read the next record. Returns `RecordEvent::Eof` when exhausted and
    /// `Err` only on unrecoverable I/O errors.
    async fn next_record(&mut self) -> Result<RecordEvent>;

    /// Human-readable name for logging (e.g. "jsonl", "replay").
    fn source_name(&self) -> &str;
}

// ============================================================================
// JSON lines (file / stdin)
// ============================================================================

/// One JSON FeedRecord per line. Malformed lines are skipped with a warning.
pub struct JsonLinesSource<R> {
    reader: R,
    name: String,
    line_buffer: String,
    line_no: u64,
    skipped: u64,
}

impl<R: AsyncBufRead + Unpin + Send + 'static> JsonLinesSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            line_buffer: String::with_capacity(1024),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines that could not be parsed so far.
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> RecordSource for JsonLinesSource<R> {
    async fn next_record(&mut self) -> Result<RecordEvent> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(RecordEvent::Eof);
            }
            self.line_no += 1;
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedRecord>(line) {
                Ok(record) => return Ok(RecordEvent::Record(record)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(source = %self.name, line = self.line_no, error = %e, "Skipping malformed record");
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Replay (pre-loaded records)
// ============================================================================

/// Replays pre-loaded records in timestamp order with optional delay.
pub struct ReplaySource {
    records: std::vec::IntoIter<FeedRecord>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    /// Records are sorted by timestamp; at equal timestamps OMNI comes first
    /// so the as-of join sees it.
    pub fn new(mut records: Vec<FeedRecord>, delay_ms: u64) -> Self {
        records.sort_by_key(|r| (r.timestamp, r.source != FeedSource::Omni));
        Self {
            records: records.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl RecordSource for ReplaySource {
    async fn next_record(&mut self) -> Result<RecordEvent> {
        // No delay before the first record
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.records.next() {
            Some(r) => {
                self.yielded_first = true;
                Ok(RecordEvent::Record(r))
            }
            None => Ok(RecordEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_json_lines_skips_malformed() {
        let input = concat!(
            r#"{"source":"TLE","satellite_id":"25544","timestamp":"2024-01-01T00:00:00Z","raw_fields":{"mean_motion":15.5}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"source":"OMNI","timestamp":"2024-01-01T00:00:00Z","raw_fields":{"solar_flux":"120"}}"#,
            "\n",
        );
        let mut source = JsonLinesSource::new(BufReader::new(input.as_bytes()), "test");
        let mut records = Vec::new();
        while let RecordEvent::Record(r) = source.next_record().await.unwrap() {
            records.push(r);
        }
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].satellite_id.as_deref(), Some("25544"));
        assert_eq!(records[1].source, FeedSource::Omni);
        assert_eq!(source.skipped(), 1);
    }

    #[tokio::test]
    async fn test_replay_orders_omni_first() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let records = vec![
            FeedRecord::tle("A", t0),
            FeedRecord::omni(t0),
            FeedRecord::tle("A", t0 - chrono::Duration::hours(1)),
        ];
        let mut source = ReplaySource::new(records, 0);
        let mut order = Vec::new();
        while let RecordEvent::Record(r) = source.next_record().await.unwrap() {
            order.push((r.source, r.timestamp));
        }
        assert_eq!(order[0].1, t0 - chrono::Duration::hours(1));
        assert_eq!(order[1].0, FeedSource::Omni);
        assert_eq!(order[2].0, FeedSource::Tle);
    }
}
