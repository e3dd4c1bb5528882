//! CfC (Closed-form Continuous-time) neural network with NCP wiring.
//!
//! The forecaster maps a window of standardized feature vectors to the
//! standardized feature vector one horizon ahead.
//!
//! ## Architecture
//!
//! - NCP groups: sensory → inter → command → motor, sizes from `[model]`
//! - Sensory neurons are driven by the input features
//! - Motor neurons feed a dense output projection, one output per feature
//! - Variable time steps: each step's `dt` is its spacing relative to the
//!   window's median spacing
//! - Training: truncated BPTT with decaying gradients, then Adam

pub mod cell;
pub mod network;
pub mod training;
pub mod wiring;

pub use network::CfcNetwork;
pub use training::{AdamOptimizer, Example, ExampleGradients, Gradients};
pub use wiring::{NcpWiring, NetworkConfig};
