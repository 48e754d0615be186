// src/control/filter.rs - Fixed-window moving-average (FIR) smoother
use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct SignalFilter {
    window: VecDeque<f64>,
    capacity: usize,
}

impl SignalFilter {
    /// A window of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    /// Mean of the held samples, 0 when empty.
    pub fn value(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Push and return the new mean.
    pub fn filter(&mut self, sample: f64) -> f64 {
        self.push(sample);
        self.value()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
