//! NCP (Neural Circuit Policy) sparse wiring generation.
//!
//! Generates deterministic sparse connectivity for the CfC network using
//! a seeded PRNG. Neurons are laid out in four consecutive groups:
//!
//! - **Sensory**: receive input features
//! - **Inter**: hidden processing layer
//! - **Command**: integration layer
//! - **Motor**: read out by the output projection
//!
//! Sensory neurons are assigned to features round-robin, so leading
//! features (the orbital elements in the default schema) get a second
//! neuron when there are more sensory neurons than features.
//!
//! Connections flow forward through groups with ~30% density, plus ~15%
//! recurrent density inside the inter and command groups.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

/// Forward group-to-group connection density.
const FORWARD_DENSITY: f64 = 0.30;

/// Recurrent density inside the inter and command groups.
const RECURRENT_DENSITY: f64 = 0.15;

/// Network shape. Serialized with every model state; the wiring itself is
/// regenerated from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub inputs: usize,
    pub outputs: usize,
    pub sensory: usize,
    pub inter: usize,
    pub command: usize,
    pub motor: usize,
    pub seed: u64,
}

impl NetworkConfig {
    /// Shape for a schema of `features` features predicting itself.
    pub fn from_model_config(config: &ModelConfig, features: usize) -> Self {
        Self {
            inputs: features,
            outputs: features,
            sensory: config.sensory_neurons,
            inter: config.inter_neurons,
            command: config.command_neurons,
            motor: config.motor_neurons,
            seed: config.seed,
        }
    }

    pub const fn num_neurons(&self) -> usize {
        self.sensory + self.inter + self.command + self.motor
    }

    pub const fn inter_start(&self) -> usize {
        self.sensory
    }

    pub const fn command_start(&self) -> usize {
        self.sensory + self.inter
    }

    pub const fn motor_start(&self) -> usize {
        self.sensory + self.inter + self.command
    }
}

/// Sparse wiring for the NCP network.
#[derive(Debug, Clone, PartialEq)]
pub struct NcpWiring {
    pub config: NetworkConfig,

    /// `incoming[i]` = source neuron indices that feed into neuron i,
    /// ascending.
    pub incoming: Vec<Vec<usize>>,

    /// `input_map[feature]` = sensory neurons driven by that feature.
    pub input_map: Vec<Vec<usize>>,

    /// Sum of `input_map` lengths (one input weight each).
    pub total_input_weights: usize,

    pub num_connections: usize,
}

impl NcpWiring {
    /// Generate NCP wiring. Same config, same wiring.
    pub fn generate(config: NetworkConfig) -> Self {
        let n = config.num_neurons();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut adj = vec![false; n * n];
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut num_connections = 0usize;

        let mut link = |src: usize, dst: usize, incoming: &mut Vec<Vec<usize>>| -> bool {
            let idx = src * n + dst;
            if adj[idx] {
                return false;
            }
            adj[idx] = true;
            incoming[dst].push(src);
            true
        };

        let groups = [
            (0, config.inter_start()),
            (config.inter_start(), config.command_start()),
            (config.command_start(), config.motor_start()),
            (config.motor_start(), n),
        ];

        // Forward layers: sensory -> inter -> command -> motor
        for pair in groups.windows(2) {
            let (src_start, src_end) = pair[0];
            let (dst_start, dst_end) = pair[1];
            for dst in dst_start..dst_end {
                for src in src_start..src_end {
                    if rng.gen::<f64>() < FORWARD_DENSITY && link(src, dst, &mut incoming) {
                        num_connections += 1;
                    }
                }
                // Every neuron gets at least one feed-forward input
                if incoming[dst].is_empty() {
                    let src = rng.gen_range(src_start..src_end);
                    if link(src, dst, &mut incoming) {
                        num_connections += 1;
                    }
                }
            }
        }

        // Recurrent connections within inter and command groups
        for (start, end) in [groups[1], groups[2]] {
            for dst in start..end {
                for src in start..end {
                    if src != dst
                        && rng.gen::<f64>() < RECURRENT_DENSITY
                        && link(src, dst, &mut incoming)
                    {
                        num_connections += 1;
                    }
                }
            }
        }

        for sources in &mut incoming {
            sources.sort_unstable();
        }

        let mut input_map: Vec<Vec<usize>> = vec![Vec::new(); config.inputs];
        if config.inputs > 0 {
            for neuron in 0..config.sensory {
                input_map[neuron % config.inputs].push(neuron);
            }
        }
        let total_input_weights = input_map.iter().map(Vec::len).sum();

        Self {
            config,
            incoming,
            input_map,
            total_input_weights,
            num_connections,
        }
    }

    pub const fn num_neurons(&self) -> usize {
        self.config.num_neurons()
    }
}
