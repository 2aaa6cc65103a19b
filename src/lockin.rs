//! Synchronous (X, Y) demodulation against the reference frequency.

/// Precomputes normalized sin/cos references and projects a sample block
/// onto them. The convention is fixed: `X` is the cosine projection
/// (in-phase), `Y` is the sine projection (quadrature).
pub struct LockIn {
    channels: usize,
    points: usize,
    sin_ref: Vec<f64>,
    cos_ref: Vec<f64>,
}

impl LockIn {
    pub fn new(channels: usize, points: usize) -> Self {
        let mut sin_ref: Vec<f64> = (0..points)
            .map(|k| (2.0 * std::f64::consts::PI * k as f64 / points as f64).sin())
            .collect();
        let mut cos_ref: Vec<f64> = (0..points)
            .map(|k| (2.0 * std::f64::consts::PI * k as f64 / points as f64).cos())
            .collect();

        let sin_sq: f64 = sin_ref.iter().map(|v| v * v).sum();
        let cos_sq: f64 = cos_ref.iter().map(|v| v * v).sum();
        for v in sin_ref.iter_mut() {
            *v /= sin_sq;
        }
        for v in cos_ref.iter_mut() {
            *v /= cos_sq;
        }

        Self {
            channels,
            points,
            sin_ref,
            cos_ref,
        }
    }

    /// `block` is sample-major: `block[k * channels + i]`. Returns
    /// `(X, Y)`, each length `channels`.
    pub fn calc(&self, block: &[f64]) -> (Vec<f64>, Vec<f64>) {
        debug_assert_eq!(block.len(), self.points * self.channels);
        let mut x = vec![0.0; self.channels];
        let mut y = vec![0.0; self.channels];
        for k in 0..self.points {
            let row = &block[k * self.channels..k * self.channels + self.channels];
            let c = self.cos_ref[k];
            let s = self.sin_ref[k];
            for i in 0..self.channels {
                x[i] += c * row[i];
                y[i] += s * row[i];
            }
        }
        (x, y)
    }
}

/// Magnitude and phase (degrees) from demodulated components.
pub fn magnitude_phase(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let r = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (xi * xi + yi * yi).sqrt())
        .collect();
    let phi = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| yi.atan2(*xi).to_degrees())
        .collect();
    (r, phi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_block(amps: &[f64], points: usize, channels: usize) -> Vec<f64> {
        let mut block = vec![0.0; points * channels];
        for k in 0..points {
            let s = (2.0 * std::f64::consts::PI * k as f64 / points as f64).sin();
            for i in 0..channels {
                block[k * channels + i] = amps[i] * s;
            }
        }
        block
    }

    fn cosine_block(amps: &[f64], points: usize, channels: usize) -> Vec<f64> {
        let mut block = vec![0.0; points * channels];
        for k in 0..points {
            let c = (2.0 * std::f64::consts::PI * k as f64 / points as f64).cos();
            for i in 0..channels {
                block[k * channels + i] = amps[i] * c;
            }
        }
        block
    }

    #[test]
    fn sine_input_recovers_amplitude_in_y() {
        let amps = vec![1.5, -2.0, 0.0, 3.3];
        let lockin = LockIn::new(4, 64);
        let block = sine_block(&amps, 64, 4);
        let (x, y) = lockin.calc(&block);
        for i in 0..4 {
            assert!((y[i] - amps[i]).abs() < 1e-9, "Y[{i}]={} expected {}", y[i], amps[i]);
            assert!(x[i].abs() < 1e-9, "X[{i}]={} expected ~0", x[i]);
        }
    }

    #[test]
    fn cosine_input_recovers_amplitude_in_x() {
        let amps = vec![0.5, 4.0];
        let lockin = LockIn::new(2, 16);
        let block = cosine_block(&amps, 16, 2);
        let (x, y) = lockin.calc(&block);
        for i in 0..2 {
            assert!((x[i] - amps[i]).abs() < 1e-9);
            assert!(y[i].abs() < 1e-9);
        }
    }

    #[test]
    fn dc_input_is_orthogonal() {
        let lockin = LockIn::new(3, 32);
        let block = vec![1.0; 32 * 3];
        let (x, y) = lockin.calc(&block);
        for i in 0..3 {
            assert!(x[i].abs() < 1e-9);
            assert!(y[i].abs() < 1e-9);
        }
    }

    #[test]
    fn magnitude_and_phase_match_polar_form() {
        let (r, phi) = magnitude_phase(&[1.0], &[1.0]);
        assert!((r[0] - std::f64::consts::SQRT_2).abs() < 1e-12);
        assert!((phi[0] - 45.0).abs() < 1e-9);
    }
}
