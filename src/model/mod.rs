//! Versioned model states and the registry that publishes them.

mod calibration;
mod registry;
mod state;

pub use calibration::{ResidualCalibration, PRIOR_SIGMA};
pub use registry::ModelRegistry;
pub use state::{ModelError, ModelKey, ModelParameters, ModelState, ParameterUpdate};
