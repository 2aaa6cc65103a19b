//! Streaming averagers shared between the PI feedback path's display
//! averaging and the raw-series averaging used for plotting.
//!
//! All three variants share one contract: `reset`, `set_size`, `step`.
//! `step` always returns a value with the same shape as its input.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragingMode {
    None,
    Sliding,
    Exponential,
}

pub trait Averager: Send {
    fn reset(&mut self);
    fn set_size(&mut self, amount: f64);
    fn step(&mut self, input: &[f64]) -> Vec<f64>;
}

/// Returns the input unchanged.
#[derive(Default)]
pub struct IdentityAverager;

impl Averager for IdentityAverager {
    fn reset(&mut self) {}
    fn set_size(&mut self, _amount: f64) {}
    fn step(&mut self, input: &[f64]) -> Vec<f64> {
        input.to_vec()
    }
}

/// Exponential moving average with decay constant `a` in units of calls:
/// `out(0) = in(0)`, `out(i) = (1/a)*in(i) + (1 - 1/a)*out(i-1)`.
pub struct ExponentialAverager {
    new_mult: f64,
    old_mult: f64,
    state: Option<Vec<f64>>,
}

impl ExponentialAverager {
    pub fn new(amount: f64) -> Self {
        let mut a = Self {
            new_mult: 0.0,
            old_mult: 0.0,
            state: None,
        };
        a.set_size(amount);
        a
    }
}

impl Averager for ExponentialAverager {
    fn reset(&mut self) {
        self.state = None;
    }

    fn set_size(&mut self, amount: f64) {
        let amount = amount.max(1.0);
        self.new_mult = 1.0 / amount;
        self.old_mult = 1.0 - self.new_mult;
    }

    fn step(&mut self, input: &[f64]) -> Vec<f64> {
        let next = match &self.state {
            None => input.to_vec(),
            Some(prev) => input
                .iter()
                .zip(prev)
                .map(|(new, old)| self.new_mult * new + self.old_mult * old)
                .collect(),
        };
        self.state = Some(next.clone());
        next
    }
}

/// Mean of the last `window` inputs (or fewer, while the FIFO is filling).
pub struct SlidingWindowAverager {
    window: usize,
    queue: VecDeque<Vec<f64>>,
    sum: Vec<f64>,
}

impl SlidingWindowAverager {
    pub fn new(window: f64) -> Self {
        let mut a = Self {
            window: 1,
            queue: VecDeque::new(),
            sum: Vec::new(),
        };
        a.set_size(window);
        a
    }

    fn drop_excess(&mut self) {
        while self.queue.len() > self.window {
            if let Some(oldest) = self.queue.pop_front() {
                for (s, v) in self.sum.iter_mut().zip(&oldest) {
                    *s -= v;
                }
            }
        }
    }
}

impl Averager for SlidingWindowAverager {
    fn reset(&mut self) {
        self.queue.clear();
        self.sum.iter_mut().for_each(|s| *s = 0.0);
    }

    fn set_size(&mut self, amount: f64) {
        self.window = (amount.round().max(1.0)) as usize;
        self.drop_excess();
    }

    fn step(&mut self, input: &[f64]) -> Vec<f64> {
        if self.sum.len() != input.len() {
            self.sum = vec![0.0; input.len()];
        }
        for (s, v) in self.sum.iter_mut().zip(input) {
            *s += v;
        }
        self.queue.push_back(input.to_vec());
        self.drop_excess();
        let n = self.queue.len() as f64;
        self.sum.iter().map(|s| s / n).collect()
    }
}

/// Construct a boxed averager from its mode and size parameter.
pub fn make_averager(mode: AveragingMode, amount: f64) -> Box<dyn Averager> {
    match mode {
        AveragingMode::None => Box::new(IdentityAverager),
        AveragingMode::Sliding => Box::new(SlidingWindowAverager::new(amount)),
        AveragingMode::Exponential => Box::new(ExponentialAverager::new(amount)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_returns_input() {
        let mut a = IdentityAverager;
        assert_eq!(a.step(&[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn exponential_a_one_is_idempotent() {
        let mut a = ExponentialAverager::new(1.0);
        for v in [1.0, 5.0, -3.0, 2.0] {
            assert_eq!(a.step(&[v]), vec![v]);
        }
    }

    #[test]
    fn exponential_first_call_returns_input_exactly() {
        let mut a = ExponentialAverager::new(4.0);
        assert_eq!(a.step(&[10.0, -10.0]), vec![10.0, -10.0]);
    }

    #[test]
    fn sliding_window_one_is_identity() {
        let mut a = SlidingWindowAverager::new(1.0);
        assert_eq!(a.step(&[1.0]), vec![1.0]);
        assert_eq!(a.step(&[2.0]), vec![2.0]);
    }

    #[test]
    fn sliding_window_large_converges_to_constant() {
        let mut a = SlidingWindowAverager::new(1000.0);
        let mut last = vec![0.0];
        for _ in 0..200 {
            last = a.step(&[3.0]);
        }
        assert!((last[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn sliding_window_shrinking_drops_oldest() {
        let mut a = SlidingWindowAverager::new(4.0);
        a.step(&[1.0]);
        a.step(&[2.0]);
        a.step(&[3.0]);
        a.step(&[4.0]);
        a.set_size(2.0);
        // Shrinking to 2 should leave only the two most recent entries (3.0, 4.0).
        let out = a.step(&[5.0]);
        assert_eq!(out, vec![4.5]);
    }

    #[test]
    fn exponential_set_size_keeps_running_value() {
        let mut a = ExponentialAverager::new(2.0);
        let first = a.step(&[10.0]);
        assert_eq!(first, vec![10.0]);
        a.set_size(8.0);
        let second = a.step(&[0.0]);
        // new_mult = 1/8, old_mult = 7/8, prior state retained at 10.0
        assert!((second[0] - (0.125 * 0.0 + 0.875 * 10.0)).abs() < 1e-12);
    }
}
