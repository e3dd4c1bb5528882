//! Feed ingestion: record normalization, as-of weather joins, TLE / OMNI
//! text parsing and offline statistics calibration.

pub mod normalizer;
pub mod omni;
pub mod stats;
pub mod tle;
pub mod weather;

pub use normalizer::{physical_fields, FeedNormalizer, Normalized, PhysicalFields, Rejection};
pub use omni::{parse_omni_row, parse_omni_text, OmniParseError, OmniParseReport};
pub use stats::StatsAccumulator;
pub use tle::{parse_tle_text, TleElements, TleParseError, TleParseReport};
pub use weather::{WeatherHistory, WeatherSample, WEATHER_FIELDS};
