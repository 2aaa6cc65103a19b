//! Orchestrates one control cycle: demodulate, average, control, mix,
//! re-render the drive sines. Owns all per-channel state and publishes an
//! immutable snapshot after every step for readers outside the engine
//! thread.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::averager::{self, Averager, AveragingMode};
use crate::bias_mixer::BiasMixer;
use crate::error::NumericError;
use crate::lockin::{self, LockIn};
use crate::pi_controller::PiController;
use crate::sine_source::SineSource;

/// Immutable, cheaply-cloneable view of engine state for control-plane and
/// TCP readers. Never mutated in place; a new one replaces the old behind
/// the engine's `RwLock` after each step.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub r: Vec<f64>,
    pub phi: Vec<f64>,
    pub series_avg: Vec<f64>,
    pub amp_out: Vec<f64>,
    pub setpoint: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

pub struct FeedbackEngine {
    channels: usize,
    points: usize,
    sine: SineSource,
    lockin: LockIn,
    series_averager: Box<dyn Averager>,
    amp_averager: Box<dyn Averager>,
    avg_mode: AveragingMode,
    avg_amount: f64,
    pi: PiController,
    mixer: BiasMixer,
    enabled: Vec<bool>,
    amp_out: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
    r: Vec<f64>,
    phi: Vec<f64>,
    series_avg: Vec<f64>,
    snapshot: Arc<RwLock<Arc<EngineSnapshot>>>,
}

impl FeedbackEngine {
    pub fn new(channels: usize, points: usize) -> Self {
        let avg_mode = AveragingMode::None;
        let avg_amount = 1.0;
        let initial = Arc::new(EngineSnapshot {
            x: vec![0.0; channels],
            y: vec![0.0; channels],
            r: vec![0.0; channels],
            phi: vec![0.0; channels],
            series_avg: vec![0.0; points * channels],
            amp_out: vec![0.0; channels],
            setpoint: vec![0.0; channels],
            timestamp: Utc::now(),
        });
        Self {
            channels,
            points,
            sine: SineSource::new(channels, points),
            lockin: LockIn::new(channels, points),
            series_averager: averager::make_averager(avg_mode, avg_amount),
            amp_averager: averager::make_averager(avg_mode, avg_amount),
            avg_mode,
            avg_amount,
            pi: PiController::new(channels),
            mixer: BiasMixer::new(channels),
            enabled: vec![false; channels],
            amp_out: vec![0.0; channels],
            x: vec![0.0; channels],
            y: vec![0.0; channels],
            r: vec![0.0; channels],
            phi: vec![0.0; channels],
            series_avg: vec![0.0; points * channels],
            snapshot: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn amp_out(&self) -> &[f64] {
        &self.amp_out
    }

    pub fn setpoint(&self) -> &[f64] {
        self.pi.setpoint()
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn r(&self) -> &[f64] {
        &self.r
    }

    pub fn phi(&self) -> &[f64] {
        &self.phi
    }

    /// Handle shared with control-plane/TCP readers; each carries an `Arc`
    /// clone of the most recent published snapshot.
    pub fn snapshot_handle(&self) -> Arc<RwLock<Arc<EngineSnapshot>>> {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn publish_snapshot(&self) {
        let snap = Arc::new(EngineSnapshot {
            x: self.x.clone(),
            y: self.y.clone(),
            r: self.r.clone(),
            phi: self.phi.clone(),
            series_avg: self.series_avg.clone(),
            amp_out: self.amp_out.clone(),
            setpoint: self.pi.setpoint().to_vec(),
            timestamp: Utc::now(),
        });
        *self.snapshot.write() = snap;
    }

    /// One control cycle, per §4.6: demodulate, average, PI, mix, re-render.
    pub fn step(&mut self, in_block: &[f64]) {
        debug_assert_eq!(in_block.len(), self.points * self.channels);

        let (x, y) = self.lockin.calc(in_block);
        self.series_avg = self.series_averager.step(in_block);

        // Feedback uses the unaveraged X so loop latency isn't inflated by
        // the display averager; the averaged (X, Y) stack feeds only the
        // published X/Y/R/phi.
        let stacked: Vec<f64> = x.iter().chain(y.iter()).copied().collect();
        let amp_avg = self.amp_averager.step(&stacked);

        let pi_out = self.pi.step(&x);

        let mut requested = vec![0.0; self.channels];
        for i in 0..self.channels {
            requested[i] = if self.enabled[i] { pi_out[i] } else { self.amp_out[i] };
        }

        let mixed = self.mixer.step(&requested);
        let updates: Vec<Option<f64>> = mixed.iter().map(|v| Some(*v)).collect();
        self.sine.set_amps(&updates);

        for i in 0..self.channels {
            if self.enabled[i] {
                self.amp_out[i] = mixed[i];
            }
        }

        let x_avg = amp_avg[..self.channels].to_vec();
        let y_avg = amp_avg[self.channels..].to_vec();
        let (r, phi) = lockin::magnitude_phase(&x_avg, &y_avg);
        self.x = x_avg;
        self.y = y_avg;
        self.r = r;
        self.phi = phi;

        self.publish_snapshot();
    }

    /// Output to hand the DAQ, clamped to the hardware's output range.
    pub fn sine_out(&mut self) -> Vec<f64> {
        self.sine.render().iter().map(|v| v.clamp(-10.0, 10.0)).collect()
    }

    pub fn set_setpoint(&mut self, channel: usize, value: f64) {
        self.pi.set_setpoint(channel, value);
    }

    /// Only takes effect while channel `i` is not feedback-enabled.
    pub fn set_amp(&mut self, channel: usize, value: f64) {
        if !self.enabled[channel] {
            self.amp_out[channel] = value;
        }
    }

    pub fn set_ki(&mut self, ki: f64) {
        self.pi.set_ki(ki);
    }

    pub fn set_kp(&mut self, kp: f64) {
        self.pi.set_kp(kp);
    }

    pub fn set_reference(&mut self, channel: Option<usize>) {
        self.pi.set_reference(channel);
    }

    pub fn set_averaging(&mut self, mode: AveragingMode, amount: f64) {
        self.avg_mode = mode;
        self.avg_amount = amount;
        self.series_averager = averager::make_averager(mode, amount);
        self.amp_averager = averager::make_averager(mode, amount);
    }

    pub fn reset_averaging(&mut self) {
        self.series_averager.reset();
        self.amp_averager.reset();
    }

    /// The delicate control-plane operation from §4.6: flips `enabled[i]`,
    /// rebuilds the mixer's disabled mask, and re-seeds the PI integrator
    /// from the inverse mix so `amp_out` stays continuous across the flip.
    pub fn set_feedback_enabled(&mut self, channel: usize, on: bool) {
        self.enabled[channel] = on;
        let disabled: Vec<bool> = self.enabled.iter().map(|e| !e).collect();
        self.mixer.set_disabled(disabled);
        let integrator = self.mixer.inverse();
        self.pi.zero_errors(Some(integrator));
        self.pi.set_output_enabled(channel, on);
    }

    pub fn set_bias_alpha(&mut self, alpha: f64) {
        self.mixer.set_alpha(alpha);
    }

    /// If `max|amp_out| > 1e-3`, set `ki := scale * max|amp_out| / max(R)`
    /// and return the new value; otherwise leave `ki` unchanged.
    pub fn autotune_pid(&mut self, scale: f64) -> Option<f64> {
        let max_amp = self.amp_out.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if max_amp <= 1e-3 {
            return None;
        }
        let max_r = self.r.iter().fold(0.0_f64, |acc, v| acc.max(*v));
        if max_r == 0.0 {
            log::warn!("{}", NumericError::ZeroAutotuneDenominator);
            return None;
        }
        let ki = scale * max_amp / max_r;
        self.pi.set_ki(ki);
        Some(ki)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_block(amps: &[f64], points: usize, channels: usize) -> Vec<f64> {
        let mut block = vec![0.0; points * channels];
        for k in 0..points {
            let s = (2.0 * std::f64::consts::PI * k as f64 / points as f64).sin();
            for i in 0..channels {
                block[k * channels + i] = amps[i] * s;
            }
        }
        block
    }

    #[test]
    fn step_publishes_x_matching_lockin_output() {
        let mut engine = FeedbackEngine::new(2, 32);
        let block = identity_block(&[1.0, -2.0], 32, 2);
        engine.step(&block);
        assert!((engine.x()[0]).abs() < 1e-9);
        assert!((engine.y()[0] - 1.0).abs() < 1e-9);
        assert!((engine.y()[1] - (-2.0)).abs() < 1e-9);
    }

    #[test]
    fn disabling_feedback_keeps_amp_out_continuous() {
        let mut engine = FeedbackEngine::new(3, 32);
        engine.set_ki(0.05);
        engine.set_kp(0.0);
        engine.set_setpoint(0, 0.5);
        engine.set_feedback_enabled(0, true);

        let flat = vec![0.0; 32 * 3];
        for _ in 0..20 {
            engine.step(&flat);
        }
        let before = engine.amp_out()[0];

        engine.set_feedback_enabled(0, false);
        engine.step(&flat);
        let after = engine.amp_out()[0];
        assert!((after - before).abs() < 1e-9, "amp_out jumped from {before} to {after}");
    }

    #[test]
    fn autotune_scales_ki_by_amp_over_r_ratio() {
        let mut engine = FeedbackEngine::new(1, 32);
        engine.amp_out[0] = 1.0;
        engine.r[0] = 0.1;
        let ratio = engine.autotune_pid(1.0).unwrap();
        assert!((ratio - 10.0).abs() < 1e-9);
    }

    #[test]
    fn autotune_leaves_ki_unchanged_when_amp_out_is_near_zero() {
        let mut engine = FeedbackEngine::new(1, 32);
        engine.set_ki(0.01);
        engine.amp_out[0] = 1e-6;
        assert!(engine.autotune_pid(1.0).is_none());
        assert!((engine.pi.ki() - 0.01).abs() < 1e-12);
    }
}
