//! Current-conservation coupling matrix ("bias-resistor" transform).
//!
//! Couples per-channel requested amplitudes so that, ideally, their sum
//! through identical bias resistors is zero current. Disabled channels
//! are decoupled from the rest: their row and column collapse to the
//! identity.

use crate::error::NumericError;
use crate::linalg;

pub struct BiasMixer {
    channels: usize,
    alpha: f64,
    disabled: Vec<bool>,
    mix: Vec<f64>,
    last_in: Vec<f64>,
    last_out: Vec<f64>,
}

impl BiasMixer {
    pub fn new(channels: usize) -> Self {
        let mut m = Self {
            channels,
            alpha: 0.5,
            disabled: vec![false; channels],
            mix: vec![0.0; channels * channels],
            last_in: vec![0.0; channels],
            last_out: vec![0.0; channels],
        };
        m.rebuild();
        m
    }

    pub fn mix(&self) -> &[f64] {
        &self.mix
    }

    pub fn last_out(&self) -> &[f64] {
        &self.last_out
    }

    pub fn set_disabled(&mut self, disabled: Vec<bool>) {
        debug_assert_eq!(disabled.len(), self.channels);
        self.disabled = disabled;
        self.rebuild();
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let n = self.channels;
        let enabled_count = self.disabled.iter().filter(|d| !**d).count();

        if enabled_count <= 1 {
            self.mix.iter_mut().for_each(|v| *v = 0.0);
            for i in 0..n {
                self.mix[i * n + i] = 1.0;
            }
            return;
        }

        let off_diag = -(1.0 - self.alpha) / (enabled_count as f64 - 1.0);
        for i in 0..n {
            for j in 0..n {
                self.mix[i * n + j] = if i == j {
                    1.0
                } else if self.disabled[i] || self.disabled[j] {
                    0.0
                } else {
                    off_diag
                };
            }
        }
    }

    /// Apply the mixing matrix, remembering input and output for `inverse`.
    pub fn step(&mut self, v: &[f64]) -> Vec<f64> {
        self.last_in = v.to_vec();
        self.last_out = linalg::mat_vec(&self.mix, v, self.channels);
        self.last_out.clone()
    }

    /// `mix^-1 * last_out`, used after a mutation of `mix` to derive an
    /// integrator preset that would reproduce `last_out` under the new
    /// matrix. Falls back to `last_out` itself (identity) if `mix` is
    /// singular.
    pub fn inverse(&self) -> Vec<f64> {
        match linalg::invert(&self.mix, self.channels) {
            Some(inv) => linalg::mat_vec(&inv, &self.last_out, self.channels),
            None => {
                log::warn!("{}", NumericError::SingularMixer);
                self.last_out.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn single_enabled_channel_is_identity() {
        let mut m = BiasMixer::new(4);
        m.set_disabled(vec![true, true, true, false]);
        let n = 4;
        for i in 0..n {
            for j in 0..n {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(m.mix()[i * n + j], expected);
            }
        }
    }

    #[test]
    fn row_sums_match_alpha_for_enabled_rows() {
        let channels = 5;
        for alpha_tenths in 0..=10 {
            let alpha = alpha_tenths as f64 / 10.0;
            let mut m = BiasMixer::new(channels);
            m.set_disabled(vec![false, false, true, false, false]);
            m.set_alpha(alpha);
            let n = channels;
            for i in 0..n {
                let row_sum: f64 = m.mix()[i * n..i * n + n].iter().sum();
                if m.disabled[i] {
                    assert_abs_diff_eq!(row_sum, 1.0, epsilon = 1e-9);
                } else {
                    assert_abs_diff_eq!(row_sum, alpha, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn inverse_reproduces_last_out_under_new_matrix() {
        let mut m = BiasMixer::new(3);
        let requested = vec![1.0, 2.0, -1.0];
        let mixed = m.step(&requested);
        assert_eq!(mixed, m.last_out().to_vec());

        m.set_disabled(vec![false, true, false]);
        let preset = m.inverse();
        let reproduced = linalg::mat_vec(&m.mix, &preset, 3);
        for (a, b) in reproduced.iter().zip(m.last_out()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn diagonal_is_always_one() {
        let mut m = BiasMixer::new(6);
        m.set_disabled(vec![false, true, false, false, true, false]);
        m.set_alpha(0.3);
        for i in 0..6 {
            assert_eq!(m.mix()[i * 6 + i], 1.0);
        }
    }
}
