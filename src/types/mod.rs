//! Shared data structures for the forecasting pipeline
//!
//! - FeedRecord: raw TLE / OMNI observation
//! - FeatureSchema, FeatureVector: normalized per-satellite observation
//! - Window: gap-free sequence handed to training and inference
//! - Prediction: forecast with uncertainty and staleness
//! - PipelineEvent: rejections, invalidations, backpressure, publications

mod events;
mod features;
mod feed;
mod prediction;
mod window;

pub use events::*;
pub use features::*;
pub use feed::*;
pub use prediction::*;
pub use window::*;
