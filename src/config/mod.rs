//! Forecast Configuration Module
//!
//! Pipeline, training, model and serving parameters loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `ORBCAST_CONFIG` environment variable (path to TOML file)
//! 2. `orbcast.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The loaded config is validated once and then handed to each component
//! explicitly; components never read configuration from ambient state.

mod forecast_config;
pub mod defaults;
pub mod validation;

pub use forecast_config::*;
