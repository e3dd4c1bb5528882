//! BPTT gradients and Adam optimizer for the CfC network.
//!
//! Gradient computation is pure: it reads the weights and returns a
//! [`Gradients`] value, so several windows can be differentiated in
//! parallel and averaged before a single optimizer step.
//!
//! BPTT runs through at most `depth` steps, with gradient contributions
//! scaled by `decay^k` for the k-th step back.

use serde::{Deserialize, Serialize};

use super::cell::{sigmoid, CfcCell, CfcWeights, ForwardCache};
use super::wiring::NcpWiring;
use crate::config::TrainingConfig;

/// Gradient accumulators, same layout as [`CfcWeights`].
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub d_w_tau: Vec<f64>,
    pub d_w_f: Vec<f64>,
    pub d_w_g: Vec<f64>,
    pub d_b_tau: Vec<f64>,
    pub d_b_f: Vec<f64>,
    pub d_b_g: Vec<f64>,
    pub d_w_out: Vec<f64>,
    pub d_b_out: Vec<f64>,
    pub d_w_in: Vec<f64>,
}

impl Gradients {
    pub fn zeros(weights: &CfcWeights) -> Self {
        Self {
            d_w_tau: vec![0.0; weights.w_tau.len()],
            d_w_f: vec![0.0; weights.w_f.len()],
            d_w_g: vec![0.0; weights.w_g.len()],
            d_b_tau: vec![0.0; weights.b_tau.len()],
            d_b_f: vec![0.0; weights.b_f.len()],
            d_b_g: vec![0.0; weights.b_g.len()],
            d_w_out: vec![0.0; weights.w_out.len()],
            d_b_out: vec![0.0; weights.b_out.len()],
            d_w_in: vec![0.0; weights.w_in.len()],
        }
    }

    fn parts(&self) -> [&Vec<f64>; 9] {
        [
            &self.d_w_tau, &self.d_w_f, &self.d_w_g,
            &self.d_b_tau, &self.d_b_f, &self.d_b_g,
            &self.d_w_out, &self.d_b_out, &self.d_w_in,
        ]
    }

    fn parts_mut(&mut self) -> [&mut Vec<f64>; 9] {
        [
            &mut self.d_w_tau, &mut self.d_w_f, &mut self.d_w_g,
            &mut self.d_b_tau, &mut self.d_b_f, &mut self.d_b_g,
            &mut self.d_w_out, &mut self.d_b_out, &mut self.d_w_in,
        ]
    }

    /// Element-wise sum. Both sides must come from the same network shape.
    pub fn add(&mut self, other: &Self) {
        for (dst, src) in self.parts_mut().into_iter().zip(other.parts()) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for part in self.parts_mut() {
            for v in part.iter_mut() {
                *v *= factor;
            }
        }
    }

    pub fn norm(&self) -> f64 {
        self.parts()
            .iter()
            .flat_map(|p| p.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Clip to `max_norm`. Returns the norm before clipping.
    pub fn clip(&mut self, max_norm: f64) -> f64 {
        let norm = self.norm();
        if norm > max_norm && norm > 0.0 {
            self.scale(max_norm / norm);
        }
        norm
    }

    pub fn is_finite(&self) -> bool {
        self.parts().iter().all(|p| p.iter().all(|v| v.is_finite()))
    }

    /// Flatten in the order of [`CfcWeights::to_flat`].
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.parts().iter().map(|p| p.len()).sum());
        for part in self.parts() {
            flat.extend_from_slice(part);
        }
        flat
    }
}

/// One training example: an input sequence, per-step dts and a target.
#[derive(Debug, Clone, Copy)]
pub struct Example<'a> {
    pub inputs: &'a [&'a [f64]],
    pub dts: &'a [f64],
    pub target: &'a [f64],
}

/// Result of differentiating one example.
#[derive(Debug, Clone)]
pub struct ExampleGradients {
    pub grads: Gradients,
    pub loss: f64,
    /// `prediction - target` per output.
    pub residuals: Vec<f64>,
}

/// Forward the example from a zero state, compute the feature-weighted MSE
/// against the target, and backprop through the last `depth` steps.
///
/// `loss_weights` holds one weight per output. All-zero weights fall back to
/// uniform.
pub fn example_gradients(
    example: Example<'_>,
    weights: &CfcWeights,
    wiring: &NcpWiring,
    loss_weights: &[f64],
    depth: usize,
    decay: f64,
) -> ExampleGradients {
    let steps = example
        .inputs
        .iter()
        .zip(example.dts)
        .map(|(input, &dt)| (*input, dt));
    let (output, caches) = CfcCell::run_sequence(steps, weights, wiring);

    let mut weight_sum: f64 = loss_weights.iter().sum();
    let uniform = weight_sum <= 0.0;
    if uniform {
        weight_sum = output.len().max(1) as f64;
    }

    let mut loss = 0.0;
    let mut residuals = Vec::with_capacity(output.len());
    let mut d_output = vec![0.0; output.len()];
    for (i, (&pred, &target)) in output.iter().zip(example.target).enumerate() {
        let w = if uniform { 1.0 } else { loss_weights.get(i).copied().unwrap_or(0.0) };
        let err = pred - target;
        residuals.push(err);
        loss += w * err * err;
        d_output[i] = 2.0 * w * err / weight_sum;
    }
    loss /= weight_sum;

    let mut grads = Gradients::zeros(weights);
    let Some(last) = caches.last() else {
        return ExampleGradients { grads, loss, residuals };
    };

    // Output projection
    let cfg = wiring.config;
    let motor_start = cfg.motor_start();
    let mut d_h = vec![0.0; wiring.num_neurons()];
    for (o, &d_out) in d_output.iter().enumerate() {
        grads.d_b_out[o] += d_out;
        for m in 0..cfg.motor {
            let idx = o * cfg.motor + m;
            grads.d_w_out[idx] += d_out * last.h_new[motor_start + m];
            d_h[motor_start + m] += d_out * weights.w_out[idx];
        }
    }

    let mut scale = 1.0;
    for cache in caches.iter().rev().take(depth.max(1)) {
        d_h = backprop_step(&mut grads, cache, d_h, scale, weights, wiring);
        scale *= decay;
    }

    ExampleGradients { grads, loss, residuals }
}

/// Backprop through one cell step. Takes dL/dh_new, accumulates weight
/// gradients (scaled by `scale`) and returns dL/dh_prev.
fn backprop_step(
    grads: &mut Gradients,
    cache: &ForwardCache,
    mut d_h: Vec<f64>,
    scale: f64,
    weights: &CfcWeights,
    wiring: &NcpWiring,
) -> Vec<f64> {
    let n = wiring.num_neurons();
    let inter_start = wiring.config.inter_start();
    let dt = cache.dt;
    let mut d_h_prev = vec![0.0; n];

    // Reverse neuron order: a lower-index source was read after its own
    // update, so its gradient lands in this step's d_h.
    for neuron in (inter_start..n).rev() {
        let dh = d_h[neuron];
        if dh == 0.0 {
            continue;
        }
        let f = cache.f_gate[neuron];
        let g = cache.g_gate[neuron];
        let tau = cache.tau[neuron];
        let pre_f = cache.pre_f[neuron];
        let h_old = cache.h_prev[neuron];

        // h_new = f*g + (1-f)*h_old
        let df = dh * (g - h_old);
        let dg = dh * f;
        d_h_prev[neuron] += dh * (1.0 - f);

        let d_pre_g = dg * g.mul_add(-g, 1.0);
        // f = sigmoid(-(dt*tau)*pre_f)
        let d_f_input = df * f * (1.0 - f);
        let d_pre_f = d_f_input * (-(dt * tau));
        let d_tau = d_f_input * (-dt * pre_f);
        let d_pre_tau = d_tau * sigmoid(cache.pre_tau[neuron]);

        grads.d_b_tau[neuron] += d_pre_tau * scale;
        grads.d_b_f[neuron] += d_pre_f * scale;
        grads.d_b_g[neuron] += d_pre_g * scale;

        let offset = weights.weight_offset[neuron];
        for (j, &src) in wiring.incoming[neuron].iter().enumerate() {
            let idx = offset + j;
            let h_src = if src < neuron {
                cache.h_new[src]
            } else {
                cache.h_prev[src]
            };
            grads.d_w_tau[idx] += d_pre_tau * h_src * scale;
            grads.d_w_f[idx] += d_pre_f * h_src * scale;
            grads.d_w_g[idx] += d_pre_g * h_src * scale;

            let d_src = d_pre_tau * weights.w_tau[idx]
                + d_pre_f * weights.w_f[idx]
                + d_pre_g * weights.w_g[idx];
            if src < neuron {
                d_h[src] += d_src;
            } else {
                d_h_prev[src] += d_src;
            }
        }
    }

    // Sensory neurons: h[s] = input[feat] * w_in
    let mut w_in_idx = 0;
    for (feat_idx, &val) in cache.input.iter().enumerate() {
        for &neuron in wiring.input_map.get(feat_idx).map_or(&[][..], Vec::as_slice) {
            grads.d_w_in[w_in_idx] += d_h[neuron] * val * scale;
            w_in_idx += 1;
        }
    }

    d_h_prev
}

// ============================================================================
// Adam optimizer
// ============================================================================

/// Adam with exponential learning-rate decay down to a floor.
///
/// The moment vectors are part of the model state and serialized with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdamOptimizer {
    pub lr: f64,
    pub lr_decay: f64,
    pub lr_floor: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub steps: u64,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl AdamOptimizer {
    pub fn new(num_params: usize, config: &TrainingConfig) -> Self {
        Self {
            lr: config.learning_rate,
            lr_decay: config.lr_decay,
            lr_floor: config.lr_floor,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            steps: 0,
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
        }
    }

    pub fn num_params(&self) -> usize {
        self.m.len()
    }

    /// One Adam step over the flat parameter vector.
    pub fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        self.steps += 1;
        let t = self.steps as f64;
        let bc1 = 1.0 - self.beta1.powf(t);
        let bc2 = 1.0 - self.beta2.powf(t);
        let lr_t = self.lr * bc2.sqrt() / bc1;

        for i in 0..params.len().min(grads.len()).min(self.m.len()) {
            let g = grads[i];
            self.m[i] = self.beta1.mul_add(self.m[i], (1.0 - self.beta1) * g);
            self.v[i] = self.beta2.mul_add(self.v[i], (1.0 - self.beta2) * g * g);
            params[i] -= lr_t * self.m[i] / (self.v[i].sqrt() + self.epsilon);
        }

        self.lr = (self.lr * self.lr_decay).max(self.lr_floor);
    }
}
