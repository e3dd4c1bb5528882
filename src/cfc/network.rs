//! CfC network: wiring plus weights.
//!
//! Only the shape and the weights are serialized. The wiring is regenerated
//! from the shape's seed on load, so a restored network is identical to the
//! one that was saved.

use serde::{Deserialize, Serialize};

use super::cell::{CfcCell, CfcWeights};
use super::training::{example_gradients, Example, ExampleGradients};
use super::wiring::{NcpWiring, NetworkConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NetworkSnapshot", into = "NetworkSnapshot")]
pub struct CfcNetwork {
    wiring: NcpWiring,
    weights: CfcWeights,
}

#[derive(Serialize, Deserialize)]
struct NetworkSnapshot {
    config: NetworkConfig,
    weights: CfcWeights,
}

impl From<NetworkSnapshot> for CfcNetwork {
    fn from(s: NetworkSnapshot) -> Self {
        Self {
            wiring: NcpWiring::generate(s.config),
            weights: s.weights,
        }
    }
}

impl From<CfcNetwork> for NetworkSnapshot {
    fn from(n: CfcNetwork) -> Self {
        Self {
            config: n.wiring.config,
            weights: n.weights,
        }
    }
}

impl CfcNetwork {
    /// Fresh network. Weights are seeded from the shape's seed.
    pub fn new(config: NetworkConfig) -> Self {
        let wiring = NcpWiring::generate(config);
        let weights = CfcWeights::init(&wiring, config.seed.wrapping_add(1));
        Self { wiring, weights }
    }

    pub const fn config(&self) -> &NetworkConfig {
        &self.wiring.config
    }

    pub const fn wiring(&self) -> &NcpWiring {
        &self.wiring
    }

    pub const fn weights(&self) -> &CfcWeights {
        &self.weights
    }

    pub fn num_params(&self) -> usize {
        self.weights.num_params()
    }

    /// Weight dimensions agree with the wiring.
    pub fn is_consistent(&self) -> bool {
        let cfg = self.wiring.config;
        let connections: usize = self.wiring.incoming.iter().map(Vec::len).sum();
        self.weights.w_tau.len() == connections
            && self.weights.w_f.len() == connections
            && self.weights.w_g.len() == connections
            && self.weights.b_tau.len() == cfg.num_neurons()
            && self.weights.w_out.len() == cfg.outputs * cfg.motor
            && self.weights.b_out.len() == cfg.outputs
            && self.weights.w_in.len() == self.wiring.total_input_weights
    }

    /// Copy with the flat parameter vector replaced.
    pub fn with_flat_params(&self, flat: &[f64]) -> Self {
        let mut next = self.clone();
        next.weights.load_flat(flat);
        next
    }

    /// Run the sequence from a zero state and read out the next-step output.
    pub fn forecast<'a>(&self, steps: impl IntoIterator<Item = (&'a [f64], f64)>) -> Vec<f64> {
        CfcCell::run_sequence(steps, &self.weights, &self.wiring).0
    }

    pub fn gradients(
        &self,
        example: Example<'_>,
        loss_weights: &[f64],
        depth: usize,
        decay: f64,
    ) -> ExampleGradients {
        example_gradients(example, &self.weights, &self.wiring, loss_weights, depth, decay)
    }
}
