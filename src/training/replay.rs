//! Bounded FIFO of past windows, sampled into each mini-batch.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::config::ReplaySampling;
use crate::types::Window;

pub struct ReplayBuffer {
    windows: VecDeque<Arc<Window>>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append, evicting the oldest window when full.
    pub fn push(&mut self, window: Arc<Window>) {
        if self.capacity == 0 {
            return;
        }
        while self.windows.len() >= self.capacity {
            self.windows.pop_front();
        }
        self.windows.push_back(window);
    }

    /// Up to `k` distinct windows.
    pub fn sample(&self, k: usize, strategy: ReplaySampling, rng: &mut StdRng) -> Vec<Arc<Window>> {
        let k = k.min(self.windows.len());
        match strategy {
            ReplaySampling::Uniform => rand::seq::index::sample(rng, self.windows.len(), k)
                .into_iter()
                .map(|i| Arc::clone(&self.windows[i]))
                .collect(),
            ReplaySampling::MostRecent => self
                .windows
                .iter()
                .rev()
                .take(k)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
