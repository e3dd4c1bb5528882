//! CfC (Closed-form Continuous-time) cell implementation.
//!
//! Implements the continuous-time RNN cell with time-gated updates:
//!
//! ```text
//! For each non-sensory neuron i (masked by NCP adjacency):
//!   tau[i] = softplus(W_tau * h + b_tau)
//!   f[i]   = sigmoid(-(dt * tau[i]) * (W_f * h + b_f))
//!   g[i]   = tanh(W_g * h + b_g)
//!   h_new[i] = f[i] * g[i] + (1 - f[i]) * h[i]
//! ```
//!
//! Neurons update in index order. A source with a lower index contributes
//! its value from this step, a higher-index source its previous value.
//! Sensory neurons are set directly from the input projection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::wiring::NcpWiring;

/// CfC cell weights and biases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CfcWeights {
    /// Flat per-connection weights for the three gates, indexed via
    /// `weight_offset[neuron] + j` for the j-th incoming connection.
    pub w_tau: Vec<f64>,
    pub w_f: Vec<f64>,
    pub w_g: Vec<f64>,

    /// Bias per neuron per gate.
    pub b_tau: Vec<f64>,
    pub b_f: Vec<f64>,
    pub b_g: Vec<f64>,

    /// Output projection: [outputs x motor], row-major.
    pub w_out: Vec<f64>,
    pub b_out: Vec<f64>,

    /// Input projection: one weight per (feature, sensory neuron) mapping.
    pub w_in: Vec<f64>,

    pub weight_offset: Vec<usize>,
    pub weight_count: Vec<usize>,
}

impl CfcWeights {
    /// Initialize weights with Xavier/Glorot-style uniform initialization.
    pub fn init(wiring: &NcpWiring, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let cfg = wiring.config;
        let n = cfg.num_neurons();

        let mut weight_offset = vec![0usize; n];
        let mut weight_count = vec![0usize; n];
        let mut total_weights = 0usize;
        for i in 0..n {
            weight_offset[i] = total_weights;
            weight_count[i] = wiring.incoming[i].len();
            total_weights += weight_count[i];
        }

        let init_weights = |rng: &mut StdRng| -> Vec<f64> {
            let mut w = vec![0.0; total_weights];
            for i in 0..n {
                let fan_in = weight_count[i].max(1);
                let std = (2.0 / (fan_in + 1) as f64).sqrt();
                for j in 0..weight_count[i] {
                    w[weight_offset[i] + j] = rng.gen_range(-std..std);
                }
            }
            w
        };

        let w_tau = init_weights(&mut rng);
        let w_f = init_weights(&mut rng);
        let w_g = init_weights(&mut rng);

        let out_std = (2.0 / (cfg.motor + cfg.outputs).max(1) as f64).sqrt();
        let w_out: Vec<f64> = (0..cfg.outputs * cfg.motor)
            .map(|_| rng.gen_range(-out_std..out_std))
            .collect();

        let in_std = (1.0 / cfg.inputs.max(1) as f64).sqrt();
        let w_in: Vec<f64> = (0..wiring.total_input_weights)
            .map(|_| rng.gen_range(-in_std..in_std))
            .collect();

        Self {
            w_tau,
            w_f,
            w_g,
            // Bias toward moderate time constants
            b_tau: vec![0.5; n],
            b_f: vec![0.0; n],
            b_g: vec![0.0; n],
            w_out,
            b_out: vec![0.0; cfg.outputs],
            w_in,
            weight_offset,
            weight_count,
        }
    }

    /// Total number of trainable parameters.
    pub fn num_params(&self) -> usize {
        self.w_tau.len() + self.w_f.len() + self.w_g.len()
            + self.b_tau.len() + self.b_f.len() + self.b_g.len()
            + self.w_out.len() + self.b_out.len()
            + self.w_in.len()
    }

    fn parts(&self) -> [&Vec<f64>; 9] {
        [
            &self.w_tau, &self.w_f, &self.w_g,
            &self.b_tau, &self.b_f, &self.b_g,
            &self.w_out, &self.b_out, &self.w_in,
        ]
    }

    fn parts_mut(&mut self) -> [&mut Vec<f64>; 9] {
        [
            &mut self.w_tau, &mut self.w_f, &mut self.w_g,
            &mut self.b_tau, &mut self.b_f, &mut self.b_g,
            &mut self.w_out, &mut self.b_out, &mut self.w_in,
        ]
    }

    /// All trainable parameters in one contiguous vector (optimizer layout).
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.num_params());
        for part in self.parts() {
            flat.extend_from_slice(part);
        }
        flat
    }

    /// Inverse of [`Self::to_flat`]. `flat` must have `num_params()` entries.
    pub fn load_flat(&mut self, flat: &[f64]) {
        let mut offset = 0;
        for part in self.parts_mut() {
            let n = part.len();
            part.copy_from_slice(&flat[offset..offset + n]);
            offset += n;
        }
    }

    /// L2 norm over all trainable parameters.
    pub fn param_norm(&self) -> f64 {
        self.parts()
            .iter()
            .flat_map(|p| p.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    pub fn all_finite(&self) -> bool {
        self.parts().iter().all(|p| p.iter().all(|v| v.is_finite()))
    }
}

/// Intermediate values of one forward step, needed for backprop.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    pub pre_tau: Vec<f64>,
    pub pre_f: Vec<f64>,
    pub tau: Vec<f64>,
    pub f_gate: Vec<f64>,
    pub g_gate: Vec<f64>,
    pub h_prev: Vec<f64>,
    pub h_new: Vec<f64>,
    pub input: Vec<f64>,
    pub dt: f64,
}

/// CfC cell: stateless forward pass.
pub struct CfcCell;

impl CfcCell {
    /// One time step. Returns the new hidden state and the cache.
    pub fn forward(
        input: &[f64],
        h: &[f64],
        dt: f64,
        weights: &CfcWeights,
        wiring: &NcpWiring,
    ) -> (Vec<f64>, ForwardCache) {
        let n = wiring.num_neurons();
        let inter_start = wiring.config.inter_start();
        let mut h_new = h.to_vec();

        let mut w_in_idx = 0;
        for (feat_idx, &val) in input.iter().enumerate() {
            for &neuron in wiring.input_map.get(feat_idx).map_or(&[][..], Vec::as_slice) {
                h_new[neuron] = val * weights.w_in[w_in_idx];
                w_in_idx += 1;
            }
        }

        let mut pre_tau = vec![0.0; n];
        let mut pre_f = vec![0.0; n];
        let mut tau = vec![0.0; n];
        let mut f_gate = vec![0.0; n];
        let mut g_gate = vec![0.0; n];

        for neuron in inter_start..n {
            let offset = weights.weight_offset[neuron];
            let mut sum_tau = weights.b_tau[neuron];
            let mut sum_f = weights.b_f[neuron];
            let mut sum_g = weights.b_g[neuron];

            for (j, &src) in wiring.incoming[neuron].iter().enumerate() {
                // Lower-index sources already hold this step's value
                let h_src = h_new[src];
                sum_tau += weights.w_tau[offset + j] * h_src;
                sum_f += weights.w_f[offset + j] * h_src;
                sum_g += weights.w_g[offset + j] * h_src;
            }

            pre_tau[neuron] = sum_tau;
            pre_f[neuron] = sum_f;
            tau[neuron] = softplus(sum_tau);
            f_gate[neuron] = sigmoid(-(dt * tau[neuron]) * sum_f);
            g_gate[neuron] = sum_g.tanh();
            h_new[neuron] = f_gate[neuron].mul_add(g_gate[neuron], (1.0 - f_gate[neuron]) * h[neuron]);
        }

        let cache = ForwardCache {
            pre_tau,
            pre_f,
            tau,
            f_gate,
            g_gate,
            h_prev: h.to_vec(),
            h_new: h_new.clone(),
            input: input.to_vec(),
            dt,
        };
        (h_new, cache)
    }

    /// Output projection from the motor neurons: `y = W_out * h_motor + b_out`.
    pub fn project(h: &[f64], weights: &CfcWeights, wiring: &NcpWiring) -> Vec<f64> {
        let cfg = wiring.config;
        let motor = &h[cfg.motor_start()..cfg.motor_start() + cfg.motor];
        (0..cfg.outputs)
            .map(|o| {
                let row = &weights.w_out[o * cfg.motor..(o + 1) * cfg.motor];
                row.iter()
                    .zip(motor)
                    .fold(weights.b_out[o], |acc, (w, m)| w.mul_add(*m, acc))
            })
            .collect()
    }

    /// Run a sequence from a zero hidden state and return the output after
    /// the last step, plus every step's cache.
    pub fn run_sequence<'a>(
        steps: impl IntoIterator<Item = (&'a [f64], f64)>,
        weights: &CfcWeights,
        wiring: &NcpWiring,
    ) -> (Vec<f64>, Vec<ForwardCache>) {
        let mut h = vec![0.0; wiring.num_neurons()];
        let mut caches = Vec::new();
        for (input, dt) in steps {
            let (h_new, cache) = Self::forward(input, &h, dt, weights, wiring);
            caches.push(cache);
            h = h_new;
        }
        (Self::project(&h, weights, wiring), caches)
    }
}

// ============================================================================
// Activation functions
// ============================================================================

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x // Avoid overflow
    } else {
        x.exp().ln_1p()
    }
}
