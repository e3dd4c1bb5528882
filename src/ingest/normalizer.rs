//! FeedRecord normalization.
//!
//! Turns raw TLE / OMNI records into schema-ordered, standardized feature
//! vectors. OMNI records are absorbed into an as-of history and joined onto
//! later TLE observations. Every record is either normalized or rejected
//! with a reason; nothing is imputed without being listed in the vector's
//! metadata.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::tle;
use super::weather::{WeatherHistory, WeatherSample, WEATHER_FIELDS};
use crate::config::defaults::WEATHER_HISTORY_LIMIT;
use crate::types::{
    satellite_code, FeatureMeta, FeatureSchema, FeatureVector, FeedRecord, FeedSource, RawValue,
    RejectReason, WEATHER_SENTINEL,
};

/// Orbital element fields read from TLE records, in schema order.
pub const TLE_FIELDS: [&str; 7] = [
    "mean_motion", "eccentricity", "inclination", "raan",
    "arg_perigee", "mean_anomaly", "bstar",
];

/// Leading TLE fields that must be present; the rest are optional.
const REQUIRED_TLE_FIELDS: usize = 6;

/// Accepted aliases for weather fields.
const WEATHER_ALIASES: [(&str, &str); 1] = [("f10_7", "solar_flux")];

/// OMNI "not measured" codes. Numbers equal to one of these are absent.
const OMNI_FILL_VALUES: [f64; 6] = [999.9, 9999.0, 9999.99, 99999.0, 99999.9, 9_999_999.0];

const IDENTITY_FIELD: &str = "satellite_code";

/// Why a record was refused, and which field caused it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}{}: {detail}", field_suffix(.field))]
pub struct Rejection {
    pub reason: RejectReason,
    pub field: Option<String>,
    pub detail: String,
}

impl Rejection {
    fn new(reason: RejectReason, field: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            reason,
            field: field.map(str::to_string),
            detail: detail.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(RejectReason::MissingField, Some(field), format!("'{field}' is required"))
    }

    fn parse(field: &str, detail: impl Into<String>) -> Self {
        Self::new(RejectReason::ParseError, Some(field), detail)
    }
}

fn field_suffix(field: &Option<String>) -> String {
    field.as_ref().map(|f| format!(" ({f})")).unwrap_or_default()
}

/// Result of normalizing one accepted record.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A TLE observation became a feature vector
    Features(FeatureVector),
    /// An OMNI sample was stored for later as-of joins
    Weather {
        observed_at: DateTime<Utc>,
        measured: usize,
    },
}

/// Validated field values of one record, in physical units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalFields {
    pub values: Vec<(&'static str, f64)>,
    /// Optional fields the record did not carry
    pub absent: Vec<&'static str>,
    /// Fields converted from degrees to radians
    pub converted: Vec<&'static str>,
}

impl PhysicalFields {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

fn read_number(record: &FeedRecord, field: &str) -> Result<Option<f64>, Rejection> {
    let value = match record.raw_fields.get(field) {
        None => return Ok(None),
        Some(RawValue::Number(v)) => *v,
        Some(RawValue::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|e| Rejection::parse(field, format!("'{text}': {e}")))?,
    };
    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(Rejection::parse(field, format!("non-finite value {value}")))
    }
}

fn read_text<'a>(record: &'a FeedRecord, field: &str) -> Result<Option<&'a str>, Rejection> {
    match record.raw_fields.get(field) {
        None => Ok(None),
        Some(RawValue::Text(text)) => Ok(Some(text.as_str())),
        Some(RawValue::Number(_)) => Err(Rejection::parse(field, "expected element-set text")),
    }
}

/// Raw (unconverted) orbital elements of a TLE record.
fn read_tle_raw(record: &FeedRecord) -> Result<[Option<f64>; 7], Rejection> {
    if let (Some(line1), Some(line2)) = (read_text(record, "line1")?, read_text(record, "line2")?) {
        let elements = tle::parse_elements(None, line1, line2)
            .map_err(|e| Rejection::parse("line1", e.to_string()))?;
        let mut raw = [None; 7];
        for (slot, (_, v)) in raw.iter_mut().zip(elements.fields()) {
            *slot = Some(v);
        }
        return Ok(raw);
    }

    let mut raw = [None; 7];
    for (i, field) in TLE_FIELDS.iter().enumerate() {
        if i < REQUIRED_TLE_FIELDS && !record.raw_fields.contains_key(*field) {
            return Err(Rejection::missing(field));
        }
    }
    for (slot, field) in raw.iter_mut().zip(TLE_FIELDS) {
        *slot = read_number(record, field)?;
    }
    Ok(raw)
}

/// Raw weather values of an OMNI record; fill codes read as absent.
fn read_weather_raw(record: &FeedRecord) -> Result<[Option<f64>; 4], Rejection> {
    let mut raw = [None; 4];
    for (slot, field) in raw.iter_mut().zip(WEATHER_FIELDS) {
        let mut value = read_number(record, field)?;
        if value.is_none() {
            for (alias, target) in WEATHER_ALIASES {
                if target == field {
                    value = read_number(record, alias)?;
                }
            }
        }
        *slot = value.filter(|v| !OMNI_FILL_VALUES.contains(v));
    }
    if raw.iter().all(Option::is_none) {
        return Err(Rejection::new(
            RejectReason::MissingField,
            None,
            format!("OMNI record carries none of {}", WEATHER_FIELDS.join(", ")),
        ));
    }
    Ok(raw)
}

/// Bounds-check raw values against the schema and convert them to physical
/// units. Fields the schema does not know pass through unchecked.
fn to_physical(
    schema: &FeatureSchema,
    names: &[&'static str],
    raw: &[Option<f64>],
) -> Result<PhysicalFields, Rejection> {
    let mut out = PhysicalFields::default();
    for (&name, value) in names.iter().zip(raw) {
        let Some(value) = *value else {
            out.absent.push(name);
            continue;
        };
        match schema.index_of(name).map(|i| &schema.features[i]) {
            Some(spec) => {
                if !spec.bounds.contains(value) {
                    return Err(Rejection::new(
                        RejectReason::OutOfRange,
                        Some(name),
                        format!("{value} outside {}", spec.bounds),
                    ));
                }
                if spec.angular {
                    out.converted.push(name);
                }
                out.values.push((name, spec.to_physical(value)));
            }
            None => out.values.push((name, value)),
        }
    }
    Ok(out)
}

/// Validate one record field by field and return its physical values.
///
/// Stateless: no ordering, duplicate or join checks. Shared by the
/// normalizer and by statistics calibration.
pub fn physical_fields(
    schema: &FeatureSchema,
    record: &FeedRecord,
) -> Result<PhysicalFields, Rejection> {
    match record.source {
        FeedSource::Tle => {
            if record.satellite_id.as_deref().map_or(true, str::is_empty) {
                return Err(Rejection::missing("satellite_id"));
            }
            to_physical(schema, &TLE_FIELDS, &read_tle_raw(record)?)
        }
        FeedSource::Omni => to_physical(schema, &WEATHER_FIELDS, &read_weather_raw(record)?),
    }
}

/// Stateful normalizer: frozen schema, OMNI history, per-satellite last
/// accepted TLE time.
#[derive(Debug, Clone)]
pub struct FeedNormalizer {
    schema: Arc<FeatureSchema>,
    max_omni_staleness: Duration,
    weather: WeatherHistory,
    last_tle: HashMap<String, DateTime<Utc>>,
}

impl FeedNormalizer {
    pub fn new(schema: Arc<FeatureSchema>, max_omni_staleness: Duration) -> Self {
        Self {
            schema,
            max_omni_staleness,
            weather: WeatherHistory::new(WEATHER_HISTORY_LIMIT),
            last_tle: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn weather_history(&self) -> &WeatherHistory {
        &self.weather
    }

    pub fn normalize(&mut self, record: &FeedRecord) -> Result<Normalized, Rejection> {
        match record.source {
            FeedSource::Tle => self.normalize_tle(record).map(Normalized::Features),
            FeedSource::Omni => self.absorb_omni(record),
        }
    }

    fn absorb_omni(&mut self, record: &FeedRecord) -> Result<Normalized, Rejection> {
        let fields = physical_fields(&self.schema, record)?;
        let mut sample = WeatherSample::default();
        for (slot, field) in sample.values.iter_mut().zip(WEATHER_FIELDS) {
            *slot = fields.get(field);
        }
        let measured = sample.values.iter().flatten().count();

        self.weather
            .insert(record.timestamp, sample)
            .map_err(|reason| {
                Rejection::new(
                    reason,
                    None,
                    format!(
                        "OMNI epoch {} not after latest {}",
                        record.timestamp,
                        self.weather.latest().map_or_else(String::new, |t| t.to_string())
                    ),
                )
            })?;
        Ok(Normalized::Weather {
            observed_at: record.timestamp,
            measured,
        })
    }

    fn normalize_tle(&mut self, record: &FeedRecord) -> Result<FeatureVector, Rejection> {
        let fields = physical_fields(&self.schema, record)?;
        let satellite_id = record.satellite_id.clone().unwrap_or_default();
        let timestamp = record.timestamp;

        if self.last_tle.get(&satellite_id) == Some(&timestamp) {
            return Err(Rejection::new(
                RejectReason::DuplicateTimestamp,
                None,
                format!("satellite {satellite_id} already observed at {timestamp}"),
            ));
        }

        let schema = Arc::clone(&self.schema);
        let mut values = vec![WEATHER_SENTINEL; schema.len()];
        let mut meta = FeatureMeta {
            schema_fingerprint: schema.fingerprint.clone(),
            converted: fields.converted.iter().map(|s| (*s).to_string()).collect(),
            ..FeatureMeta::default()
        };

        let set = |name: &str, physical: f64, values: &mut Vec<f64>| {
            if let Some(i) = schema.index_of(name) {
                values[i] = schema.features[i].standardize(physical);
            }
        };

        for (name, physical) in &fields.values {
            set(name, *physical, &mut values);
        }
        for name in &fields.absent {
            if schema.index_of(name).is_some() {
                meta.filled.push((*name).to_string());
            }
        }
        set(IDENTITY_FIELD, satellite_code(&satellite_id), &mut values);

        match self.weather.as_of(timestamp) {
            Some((observed_at, sample)) if timestamp - observed_at <= self.max_omni_staleness => {
                meta.weather_observed_at = Some(observed_at);
                for field in WEATHER_FIELDS {
                    match sample.get(field) {
                        Some(v) => set(field, v, &mut values),
                        None if schema.index_of(field).is_some() => {
                            meta.filled.push(field.to_string());
                        }
                        None => {}
                    }
                }
            }
            other => {
                meta.stale_weather = true;
                meta.weather_observed_at = other.map(|(t, _)| t);
                meta.filled.extend(
                    WEATHER_FIELDS
                        .iter()
                        .filter(|f| schema.index_of(f).is_some())
                        .map(|f| (*f).to_string()),
                );
                debug!(
                    satellite = %satellite_id,
                    %timestamp,
                    newest_weather = ?meta.weather_observed_at,
                    "No fresh OMNI sample, weather features filled"
                );
            }
        }

        let last = self.last_tle.entry(satellite_id.clone()).or_insert(timestamp);
        if timestamp > *last {
            *last = timestamp;
        }

        Ok(FeatureVector {
            satellite_id,
            timestamp,
            values,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn tle(sat: &str, secs: i64) -> FeedRecord {
        FeedRecord::tle(sat, t(secs))
            .with_field("mean_motion", 15.5)
            .with_field("eccentricity", 0.0007)
            .with_field("inclination", 51.64)
            .with_field("raan", 120.0)
            .with_field("arg_perigee", 90.0)
            .with_field("mean_anomaly", 270.0)
            .with_field("bstar", 0.00003)
    }

    fn normalizer() -> FeedNormalizer {
        FeedNormalizer::new(Arc::new(FeatureSchema::default()), Duration::seconds(3600))
    }

    fn expect_vector(n: Normalized) -> FeatureVector {
        match n {
            Normalized::Features(v) => v,
            other => panic!("expected features, got {other:?}"),
        }
    }

    #[test]
    fn test_tle_converted_and_standardized() {
        let mut n = normalizer();
        let v = expect_vector(n.normalize(&tle("25544", 0)).unwrap());
        let schema = FeatureSchema::default();
        let inc = schema.index_of("inclination").unwrap();
        let expected = schema.features[inc].standardize(51.64_f64.to_radians());
        assert!((v.values[inc] - expected).abs() < 1e-12);
        assert!(v.meta.converted.contains(&"inclination".to_string()));
        assert_eq!(v.values.len(), schema.len());
        assert_eq!(v.meta.schema_fingerprint, schema.fingerprint);
    }

    #[test]
    fn test_missing_satellite_id() {
        let mut n = normalizer();
        let mut record = tle("x", 0);
        record.satellite_id = None;
        let err = n.normalize(&record).unwrap_err();
        assert_eq!(err.reason, RejectReason::MissingField);
        assert_eq!(err.field.as_deref(), Some("satellite_id"));
    }

    #[test]
    fn test_missing_required_field() {
        let mut n = normalizer();
        let mut record = tle("25544", 0);
        record.raw_fields.remove("raan");
        let err = n.normalize(&record).unwrap_err();
        assert_eq!(err.reason, RejectReason::MissingField);
        assert_eq!(err.field.as_deref(), Some("raan"));
        assert_eq!(err.to_string(), "missing field (raan): 'raan' is required");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_eccentricity_one_is_out_of_range() {
        let mut n = normalizer();
        let record = tle("25544", 0).with_field("eccentricity", 1.0);
        let err = n.normalize(&record).unwrap_err();
        assert_eq!(err.reason, RejectReason::OutOfRange);
        assert_eq!(err.field.as_deref(), Some("eccentricity"));
    }

    #[test]
    fn test_unparseable_text_and_nan() {
        let mut n = normalizer();
        let err = n
            .normalize(&tle("25544", 0).with_field("inclination", "fifty"))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::ParseError);

        let err = n
            .normalize(&tle("25544", 0).with_field("mean_motion", f64::NAN))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::ParseError);

        let v = n.normalize(&tle("25544", 0).with_field("inclination", " 51.6 "));
        assert!(v.is_ok());
    }

    #[test]
    fn test_duplicate_tle_timestamp() {
        let mut n = normalizer();
        n.normalize(&tle("25544", 0)).unwrap();
        let err = n.normalize(&tle("25544", 0)).unwrap_err();
        assert_eq!(err.reason, RejectReason::DuplicateTimestamp);
        assert!(err.field.is_none());
        assert!(err.to_string().starts_with("duplicate timestamp: satellite 25544"));
        // Other satellites are independent
        assert!(n.normalize(&tle("43013", 0)).is_ok());
    }

    #[test]
    fn test_missing_bstar_is_listed() {
        let mut n = normalizer();
        let mut record = tle("25544", 0);
        record.raw_fields.remove("bstar");
        let v = expect_vector(n.normalize(&record).unwrap());
        assert!(v.meta.filled.contains(&"bstar".to_string()));
        let i = FeatureSchema::default().index_of("bstar").unwrap();
        assert_eq!(v.values[i], WEATHER_SENTINEL);
    }

    #[test]
    fn test_no_weather_means_stale_and_filled() {
        let mut n = normalizer();
        let v = expect_vector(n.normalize(&tle("25544", 0)).unwrap());
        assert!(v.meta.stale_weather);
        for f in WEATHER_FIELDS {
            assert!(v.meta.filled.contains(&f.to_string()), "{f} not listed");
        }
    }

    #[test]
    fn test_weather_as_of_join() {
        let mut n = normalizer();
        let omni = FeedRecord::omni(t(0)).with_field("solar_flux", 170.0);
        assert!(matches!(
            n.normalize(&omni).unwrap(),
            Normalized::Weather { measured: 1, .. }
        ));

        let v = expect_vector(n.normalize(&tle("25544", 60)).unwrap());
        let schema = FeatureSchema::default();
        let flux = schema.index_of("solar_flux").unwrap();
        assert!((v.values[flux] - 1.0).abs() < 1e-12);
        assert!(!v.meta.stale_weather);
        assert_eq!(v.meta.weather_observed_at, Some(t(0)));
        assert!(v.meta.filled.contains(&"sym_h".to_string()));
        assert!(!v.meta.filled.contains(&"solar_flux".to_string()));

        // A sample newer than the observation is never used
        n.normalize(&FeedRecord::omni(t(100)).with_field("solar_flux", 220.0))
            .unwrap();
        let v = expect_vector(n.normalize(&tle("43013", 90)).unwrap());
        assert!((v.values[flux] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weather_too_old_is_stale() {
        let mut n = normalizer();
        n.normalize(&FeedRecord::omni(t(0)).with_field("sym_h", -40.0))
            .unwrap();
        let v = expect_vector(n.normalize(&tle("25544", 7200)).unwrap());
        assert!(v.meta.stale_weather);
        assert_eq!(v.meta.weather_observed_at, Some(t(0)));
        let i = FeatureSchema::default().index_of("sym_h").unwrap();
        assert_eq!(v.values[i], WEATHER_SENTINEL);
    }

    #[test]
    fn test_omni_ordering_and_fill_codes() {
        let mut n = normalizer();
        n.normalize(&FeedRecord::omni(t(10)).with_field("bz_gsm", -2.0))
            .unwrap();
        let dup = n
            .normalize(&FeedRecord::omni(t(10)).with_field("bz_gsm", -3.0))
            .unwrap_err();
        assert_eq!(dup.reason, RejectReason::DuplicateTimestamp);
        let back = n
            .normalize(&FeedRecord::omni(t(5)).with_field("bz_gsm", -3.0))
            .unwrap_err();
        assert_eq!(back.reason, RejectReason::OutOfOrder);

        let only_fill = n
            .normalize(&FeedRecord::omni(t(20)).with_field("sw_speed", 99999.9))
            .unwrap_err();
        assert_eq!(only_fill.reason, RejectReason::MissingField);
    }

    #[test]
    fn test_omni_alias_and_range() {
        let mut n = normalizer();
        assert!(n
            .normalize(&FeedRecord::omni(t(0)).with_field("f10_7", 95.0))
            .is_ok());
        let err = n
            .normalize(&FeedRecord::omni(t(1)).with_field("sw_speed", -5.0))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::OutOfRange);
    }

    #[test]
    fn test_element_set_lines() {
        let mut n = normalizer();
        let record = FeedRecord::tle("25544", t(0))
            .with_field(
                "line1",
                "1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992",
            )
            .with_field(
                "line2",
                "2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008",
            );
        let v = expect_vector(n.normalize(&record).unwrap());
        assert!(v.meta.filled.iter().all(|f| f != "bstar"));

        let broken = FeedRecord::tle("25544", t(1))
            .with_field("line1", "1 garbage")
            .with_field("line2", "2 garbage");
        assert_eq!(
            n.normalize(&broken).unwrap_err().reason,
            RejectReason::ParseError
        );
    }
}
