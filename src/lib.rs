//! orbcast: online-learning satellite state forecasting
//!
//! TLE element sets and OMNI space-weather samples are normalized into
//! fixed-schema feature vectors, grouped into gap-free per-satellite
//! windows, and used to train a closed-form continuous-time (CfC) network
//! one window at a time. Forecasts are served from the latest published
//! model without waiting on training.
//!
//! ## Architecture
//!
//! - **ingest**: record validation, unit conversion, standardization, as-of weather joins
//! - **sequence**: per-satellite window buffers with gap invalidation
//! - **cfc**: CfC cell, NCP wiring, BPTT gradients and Adam
//! - **model**: immutable versioned model states and their registry
//! - **training**: replay buffer, online trainer, bounded work queue
//! - **inference**: predictor with uncertainty and staleness
//! - **pipeline**: coordinator, processing loop, events
//! - **storage**: model and prediction persistence (sled or memory)
//! - **api**: HTTP read surface

pub mod api;
pub mod cfc;
pub mod config;
pub mod inference;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod sequence;
pub mod storage;
pub mod training;
pub mod types;

pub use config::ForecastConfig;
pub use inference::{Predictor, Unavailable};
pub use model::{ModelKey, ModelRegistry, ModelState};
pub use pipeline::{IngestOutcome, PipelineCoordinator, PipelineHandle};
pub use types::{FeatureSchema, FeatureVector, FeedRecord, FeedSource, PipelineEvent, Prediction, Window};
