//! Two-line element set parsing.
//!
//! Element sets are parsed with `sgp4` (checksums verified) and propagated
//! to their own epoch once, which flags decayed or otherwise unusable sets
//! before they reach the normalizer.

use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements, MinutesSinceEpoch};
use tracing::{debug, warn};

use crate::types::FeedRecord;

/// Mean Earth radius used for the derived altitude (km).
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, thiserror::Error)]
pub enum TleParseError {
    #[error("invalid element set: {0}")]
    Invalid(#[from] sgp4::TleError),
    #[error("unusable elements: {0}")]
    Elements(#[from] sgp4::ElementsError),
    #[error("propagation to epoch failed (decayed?): {0}")]
    Decayed(String),
}

/// Orbital elements of one set, angles in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct TleElements {
    pub satellite_id: String,
    pub name: Option<String>,
    pub epoch: DateTime<Utc>,
    pub mean_motion: f64,
    pub eccentricity: f64,
    pub inclination: f64,
    pub raan: f64,
    pub arg_perigee: f64,
    pub mean_anomaly: f64,
    pub bstar: f64,
}

impl TleElements {
    fn from_sgp4(elements: &Elements) -> Self {
        Self {
            satellite_id: elements.norad_id.to_string(),
            name: elements.object_name.clone(),
            epoch: elements.datetime.and_utc(),
            mean_motion: elements.mean_motion,
            eccentricity: elements.eccentricity,
            inclination: elements.inclination,
            raan: elements.right_ascension,
            arg_perigee: elements.argument_of_perigee,
            mean_anomaly: elements.mean_anomaly,
            bstar: elements.drag_term,
        }
    }

    /// Numeric fields in the names the normalizer reads.
    pub fn fields(&self) -> [(&'static str, f64); 7] {
        [
            ("mean_motion", self.mean_motion),
            ("eccentricity", self.eccentricity),
            ("inclination", self.inclination),
            ("raan", self.raan),
            ("arg_perigee", self.arg_perigee),
            ("mean_anomaly", self.mean_anomaly),
            ("bstar", self.bstar),
        ]
    }

    pub fn to_record(&self) -> FeedRecord {
        self.fields()
            .into_iter()
            .fold(FeedRecord::tle(&self.satellite_id, self.epoch), |r, (k, v)| {
                r.with_field(k, v)
            })
    }
}

/// Parse one element set without propagating it.
pub fn parse_elements(
    name: Option<String>,
    line1: &str,
    line2: &str,
) -> Result<TleElements, TleParseError> {
    let elements = Elements::from_tle(name, line1.trim().as_bytes(), line2.trim().as_bytes())?;
    Ok(TleElements::from_sgp4(&elements))
}

/// Parse one element set and propagate it to its epoch.
///
/// Returns the elements and the derived altitude in km.
pub fn parse_and_check(
    name: Option<String>,
    line1: &str,
    line2: &str,
) -> Result<(TleElements, f64), TleParseError> {
    let elements = Elements::from_tle(name, line1.trim().as_bytes(), line2.trim().as_bytes())?;
    let constants = Constants::from_elements(&elements)?;
    let state = constants
        .propagate(MinutesSinceEpoch(0.0))
        .map_err(|e| TleParseError::Decayed(e.to_string()))?;
    let [x, y, z] = state.position;
    let altitude = z.mul_add(z, x.mul_add(x, y * y)).sqrt() - EARTH_RADIUS_KM;
    Ok((TleElements::from_sgp4(&elements), altitude))
}

/// Records parsed from a TLE text file plus the sets that failed.
#[derive(Debug, Default)]
pub struct TleParseReport {
    pub records: Vec<FeedRecord>,
    /// (1-based line number of line 1, error)
    pub errors: Vec<(usize, TleParseError)>,
}

/// Split TLE text (2-line or 3-line with name) into TLE feed records.
///
/// Each record carries the numeric elements, the element-set epoch as its
/// timestamp and the catalog number as satellite id. Sets that fail to
/// propagate to their own epoch are treated as bad. Bad sets are collected in the report; they never abort
/// the rest of the file.
pub fn parse_tle_text(content: &str) -> TleParseReport {
    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    let mut report = TleParseReport::default();
    let mut i = 0;
    while i < lines.len() {
        let (name, first, second, consumed) = if lines[i].1.starts_with("1 ")
            && i + 1 < lines.len()
            && lines[i + 1].1.starts_with("2 ")
        {
            (None, lines[i], lines[i + 1], 2)
        } else if i + 2 < lines.len()
            && lines[i + 1].1.starts_with("1 ")
            && lines[i + 2].1.starts_with("2 ")
        {
            let name = lines[i].1.trim_start_matches("0 ").to_string();
            (Some(name), lines[i + 1], lines[i + 2], 3)
        } else {
            debug!(line = lines[i].0, "Skipping line outside an element set");
            i += 1;
            continue;
        };
        i += consumed;

        match parse_and_check(name, first.1, second.1) {
            Ok((elements, altitude)) => {
                debug!(satellite_id = %elements.satellite_id, altitude_km = altitude, "Element set checked");
                report.records.push(elements.to_record());
            }
            Err(e) => {
                warn!(line = first.0, error = %e, "Skipping element set");
                report.errors.push((first.0, e));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISS_L1: &str = "1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992";
    const ISS_L2: &str = "2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008";

    #[test]
    fn test_parse_elements() {
        let e = parse_elements(None, ISS_L1, ISS_L2).unwrap();
        assert_eq!(e.satellite_id, "25544");
        assert!((e.inclination - 51.6461).abs() < 1e-9);
        assert!((e.raan - 221.2784).abs() < 1e-9);
        assert!((e.eccentricity - 0.000_141_3).abs() < 1e-12);
        assert!((e.mean_motion - 15.495_078_96).abs() < 1e-6);
        assert!(e.bstar < 0.0);
        assert_eq!(e.epoch.format("%Y-%m-%d").to_string(), "2020-07-12");
    }

    #[test]
    fn test_parse_text_two_and_three_line() {
        let text = format!("{ISS_L1}\n{ISS_L2}\n\nISS (ZARYA)\n{ISS_L1}\n{ISS_L2}\n");
        let report = parse_tle_text(&text);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.records.len(), 2);
        let r = &report.records[0];
        assert_eq!(r.satellite_id.as_deref(), Some("25544"));
        assert!(r.raw_fields.contains_key("mean_motion"));
        // Altitude is only a propagation check, never a feed field
        assert!(!r.raw_fields.contains_key("altitude_km"));
        let (_, altitude) = parse_and_check(None, ISS_L1, ISS_L2).unwrap();
        assert!((300.0..500.0).contains(&altitude));
    }

    #[test]
    fn test_malformed_set_is_reported_not_fatal() {
        let broken = ISS_L1.replace("20194.88612269", "20X94.88612269");
        let text = format!("{broken}\n{ISS_L2}\n{ISS_L1}\n{ISS_L2}\n");
        let report = parse_tle_text(&text);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, 1);
    }
}
