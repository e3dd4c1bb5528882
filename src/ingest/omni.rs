//! OMNI high-resolution fixed-width row parsing.
//!
//! Rows carry 37 right-aligned columns starting with year, day-of-year, hour
//! and minute. Fill codes mark "not measured" and are dropped, so the
//! normalizer sees those fields as absent.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::FeedRecord;

/// Column widths of one OMNI row.
pub const COLUMN_WIDTHS: [usize; 37] = [
    4, 4, 3, 3, 4, 7, 7, 7, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
    7, 9, 6, 7, 7, 6, 8, 8, 8, 8, 8, 8, 6, 6, 6, 6, 6, 6, 6,
];

/// Column names, same order as [`COLUMN_WIDTHS`].
pub const COLUMN_NAMES: [&str; 37] = [
    "Year", "Day", "Hour", "Minute", "Percent_Interpolation",
    "Timeshift", "RMS_Timeshift", "Time_btwn_obs_sec", "Field_Mag_Avg_nT",
    "BX_GSE_GSM_nT", "BY_GSE_nT", "BZ_GSE_nT", "BY_GSM_nT", "BZ_GSM_nT",
    "Speed_km_s", "Vx_km_s", "Vy_km_s", "Vz_km_s", "Proton_Density",
    "Proton_Temp_K", "Flow_Pressure_nPa", "Electric_Field_mV_m",
    "Plasma_beta", "Alfven_Mach_Number", "SC_Xgse_Re", "SC_Ygse_Re",
    "SC_Zgse_Re", "BSN_Xgse_Re", "BSN_Ygse_Re", "BSN_Zgse_Re",
    "AE_index_nT", "AL_index_nT", "AU_index_nT", "SYM_D_nT",
    "SYM_H_nT", "ASY_D_nT", "ASY_H_nT",
];

/// Values OMNI uses for "no data".
const FILL_CODES: [&str; 7] = ["9999", "99999", "99999.9", "9999.99", "999.9", "9999999.", "9999999"];

/// OMNI columns forwarded to the pipeline, with their feed field names.
pub const FORWARDED_COLUMNS: [(&str, &str); 3] = [
    ("BZ_GSM_nT", "bz_gsm"),
    ("SYM_H_nT", "sym_h"),
    ("Speed_km_s", "sw_speed"),
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OmniParseError {
    #[error("row too short for column '{0}'")]
    Truncated(&'static str),
    #[error("column '{column}' is not numeric: '{value}'")]
    NotNumeric { column: &'static str, value: String },
    #[error("invalid epoch {year}-{day:03} {hour:02}:{minute:02}")]
    InvalidEpoch { year: i32, day: u32, hour: u32, minute: u32 },
}

/// One parsed row: epoch plus every non-fill column.
#[derive(Debug, Clone, PartialEq)]
pub struct OmniRow {
    pub epoch: DateTime<Utc>,
    pub columns: BTreeMap<&'static str, f64>,
}

impl OmniRow {
    /// OMNI feed record with the forwarded columns that were measured.
    pub fn to_record(&self) -> FeedRecord {
        FORWARDED_COLUMNS
            .iter()
            .filter_map(|(col, field)| self.columns.get(col).map(|v| (*field, *v)))
            .fold(FeedRecord::omni(self.epoch), |r, (k, v)| r.with_field(k, v))
    }
}

fn is_fill(value: &str) -> bool {
    FILL_CODES.contains(&value)
}

/// Parse one fixed-width row.
pub fn parse_omni_row(line: &str) -> Result<OmniRow, OmniParseError> {
    let chars: Vec<char> = line.chars().collect();
    let mut columns = BTreeMap::new();
    let mut offset = 0;
    for (&width, &name) in COLUMN_WIDTHS.iter().zip(COLUMN_NAMES.iter()) {
        if offset >= chars.len() {
            if columns.len() < 4 {
                return Err(OmniParseError::Truncated(name));
            }
            break;
        }
        let end = (offset + width).min(chars.len());
        let raw: String = chars[offset..end].iter().collect();
        offset += width;

        let value = raw.trim();
        if value.is_empty() || is_fill(value) {
            continue;
        }
        let parsed = value.parse::<f64>().map_err(|_| OmniParseError::NotNumeric {
            column: name,
            value: value.to_string(),
        })?;
        columns.insert(name, parsed);
    }

    let epoch = epoch_of(&columns)?;
    Ok(OmniRow { epoch, columns })
}

fn epoch_of(columns: &BTreeMap<&'static str, f64>) -> Result<DateTime<Utc>, OmniParseError> {
    let field = |name: &'static str| {
        columns
            .get(name)
            .copied()
            .ok_or(OmniParseError::Truncated(name))
    };
    let (year, day, hour, minute) = (field("Year")?, field("Day")?, field("Hour")?, field("Minute")?);
    let (year, day, hour, minute) = (year as i32, day as u32, hour as u32, minute as u32);
    NaiveDate::from_yo_opt(year, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .map(|dt| dt.and_utc())
        .ok_or(OmniParseError::InvalidEpoch { year, day, hour, minute })
}

/// Records parsed from OMNI text, sorted by epoch with duplicate epochs
/// removed (first occurrence wins).
#[derive(Debug, Default)]
pub struct OmniParseReport {
    pub records: Vec<FeedRecord>,
    /// Lines that were not data rows (headers, garbage)
    pub skipped: usize,
    pub duplicates: usize,
}

/// Parse the contents of one or more OMNI `.lst` files.
pub fn parse_omni_text(content: &str) -> OmniParseReport {
    let mut report = OmniParseReport::default();
    let mut rows: BTreeMap<DateTime<Utc>, OmniRow> = BTreeMap::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_omni_row(line) {
            Ok(row) => {
                if rows.contains_key(&row.epoch) {
                    report.duplicates += 1;
                } else {
                    rows.insert(row.epoch, row);
                }
            }
            Err(e) => {
                debug!(line = n + 1, error = %e, "Skipping non-data OMNI line");
                report.skipped += 1;
            }
        }
    }
    report.records = rows.values().map(OmniRow::to_record).collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedSource, RawValue};

    /// Build a row from per-column values, right-aligned in their widths.
    fn row(values: &[(&str, &str)]) -> String {
        COLUMN_WIDTHS
            .iter()
            .zip(COLUMN_NAMES.iter())
            .map(|(&w, name)| {
                let v = values
                    .iter()
                    .find(|(n, _)| n == name)
                    .map_or("9999", |(_, v)| *v);
                format!("{v:>w$}")
            })
            .collect()
    }

    fn base(day: &str, minute: &str) -> Vec<(&'static str, String)> {
        vec![
            ("Year", "2024".to_string()),
            ("Day", day.to_string()),
            ("Hour", "13".to_string()),
            ("Minute", minute.to_string()),
        ]
    }

    fn render(fields: &[(&'static str, String)]) -> String {
        let borrowed: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        row(&borrowed)
    }

    #[test]
    fn test_parse_row_epoch_and_fields() {
        let mut fields = base("61", "5");
        fields.push(("BZ_GSM_nT", "-3.21".into()));
        fields.push(("Speed_km_s", "412.5".into()));
        fields.push(("SYM_H_nT", "-14".into()));
        let parsed = parse_omni_row(&render(&fields)).unwrap();
        // 2024 is a leap year: day 61 = March 1
        assert_eq!(parsed.epoch.to_rfc3339(), "2024-03-01T13:05:00+00:00");
        assert_eq!(parsed.columns["BZ_GSM_nT"], -3.21);

        let record = parsed.to_record();
        assert_eq!(record.source, FeedSource::Omni);
        assert_eq!(record.raw_fields["sw_speed"], RawValue::Number(412.5));
        assert_eq!(record.raw_fields["sym_h"], RawValue::Number(-14.0));
    }

    #[test]
    fn test_fill_codes_are_dropped() {
        let mut fields = base("10", "0");
        fields.push(("Speed_km_s", "99999.9".into()));
        fields.push(("BZ_GSM_nT", "9999.99".into()));
        let parsed = parse_omni_row(&render(&fields)).unwrap();
        assert!(!parsed.columns.contains_key("Speed_km_s"));
        let record = parsed.to_record();
        assert!(record.raw_fields.is_empty());
    }

    #[test]
    fn test_invalid_day_of_year() {
        let fields = base("367", "0");
        assert!(matches!(
            parse_omni_row(&render(&fields)),
            Err(OmniParseError::InvalidEpoch { .. })
        ));
    }

    #[test]
    fn test_text_sorted_deduplicated_headers_skipped() {
        let mut later = base("10", "30");
        later.push(("SYM_H_nT", "-5".into()));
        let mut earlier = base("10", "10");
        earlier.push(("SYM_H_nT", "-7".into()));
        let text = format!(
            "OMNI HRO 1-min data\nYEAR DOY HR MN ...\n{}\n{}\n{}\n",
            render(&later),
            render(&earlier),
            render(&later)
        );
        let report = parse_omni_text(&text);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.duplicates, 1);
        assert!(report.records[0].timestamp < report.records[1].timestamp);
    }
}
