//! Cached-reference sine generation for N output channels.
//!
//! `render()` never calls `sin()` per sample: the reference period is
//! computed once at construction and every call is a scale-and-copy, so
//! phase stays coherent across buffers.

/// Holds a cached reference sine of length `points` and renders an
/// `points x channels` output buffer from the current amplitude vector.
///
/// The output buffer is sample-major: `out_block[k * channels + i]` is
/// sample `k` of channel `i`.
pub struct SineSource {
    channels: usize,
    points: usize,
    amp: Vec<f64>,
    sine_ref: Vec<f64>,
    out_block: Vec<f64>,
}

impl SineSource {
    pub fn new(channels: usize, points: usize) -> Self {
        let sine_ref: Vec<f64> = (0..points)
            .map(|k| (2.0 * std::f64::consts::PI * k as f64 / points as f64).sin())
            .collect();
        Self {
            channels,
            points,
            amp: vec![0.0; channels],
            sine_ref,
            out_block: vec![0.0; points * channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn amps(&self) -> &[f64] {
        &self.amp
    }

    /// Set the amplitude of a single channel.
    pub fn set_amp(&mut self, channel: usize, amp: f64) {
        self.amp[channel] = amp;
    }

    /// Bulk amplitude update. A `None` entry leaves that channel's
    /// amplitude unchanged, replacing the source's NaN-sentinel convention
    /// with an explicit mask.
    pub fn set_amps(&mut self, updates: &[Option<f64>]) {
        debug_assert_eq!(updates.len(), self.channels);
        for (i, update) in updates.iter().enumerate() {
            if let Some(a) = update {
                self.amp[i] = *a;
            }
        }
    }

    /// Render `out_block[k, i] = amp[i] * sine_ref[k]` and return it.
    pub fn render(&mut self) -> &[f64] {
        for k in 0..self.points {
            let s = self.sine_ref[k];
            let row = &mut self.out_block[k * self.channels..k * self.channels + self.channels];
            for (i, cell) in row.iter_mut().enumerate() {
                *cell = self.amp[i] * s;
            }
        }
        &self.out_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_exactly_scaled_reference() {
        let mut src = SineSource::new(2, 8);
        src.set_amps(&[Some(2.0), Some(-1.0)]);
        let block = src.render().to_vec();
        let expected_ref: Vec<f64> = (0..8)
            .map(|k| (2.0 * std::f64::consts::PI * k as f64 / 8.0).sin())
            .collect();
        for k in 0..8 {
            assert!((block[k * 2] - 2.0 * expected_ref[k]).abs() < 1e-12);
            assert!((block[k * 2 + 1] - (-1.0 * expected_ref[k])).abs() < 1e-12);
        }
    }

    #[test]
    fn none_update_leaves_channel_unchanged() {
        let mut src = SineSource::new(2, 4);
        src.set_amps(&[Some(1.0), Some(3.0)]);
        src.set_amps(&[None, Some(5.0)]);
        assert_eq!(src.amps(), &[1.0, 5.0]);
    }

    #[test]
    fn phase_is_coherent_across_renders() {
        let mut src = SineSource::new(1, 4);
        src.set_amp(0, 1.0);
        let first = src.render().to_vec();
        let second = src.render().to_vec();
        assert_eq!(first, second);
    }
}
