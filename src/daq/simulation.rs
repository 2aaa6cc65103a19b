//! Offline development backend: a timer tick stands in for the hardware
//! sample clock, and a randomized resistor-network model stands in for the
//! physical device under test.

use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

use crate::error::DaqError;
use crate::linalg;

use super::{ChannelSpec, ClockConfig, DaqPort};

/// Linearized multi-terminal resistor network: a randomized
/// negative-semi-definite conductance Laplacian `G`, combined Ohm's-law
/// style as `R·G + I` and inverted to produce the output-to-input transfer
/// matrix.
pub struct TransferMatrixModel {
    channels: usize,
    transfer: Vec<f64>,
    shift: Vec<usize>,
}

impl TransferMatrixModel {
    pub fn new(channels: usize, resistance: f64) -> Self {
        let mut rng = rand::thread_rng();
        let mut conductance = vec![0.0; channels * channels];
        for i in 0..channels {
            let mut row_sum = 0.0;
            for j in 0..channels {
                if i == j {
                    continue;
                }
                let g: f64 = rng.gen_range(0.0..1.0);
                conductance[i * channels + j] = g;
                row_sum += g;
            }
            conductance[i * channels + i] = -row_sum;
        }

        let mut system = vec![0.0; channels * channels];
        for i in 0..channels {
            for j in 0..channels {
                let identity = if i == j { 1.0 } else { 0.0 };
                system[i * channels + j] = resistance * conductance[i * channels + j] + identity;
            }
        }

        let transfer = linalg::invert(&system, channels).unwrap_or_else(|| {
            let mut id = vec![0.0; channels * channels];
            for i in 0..channels {
                id[i * channels + i] = 1.0;
            }
            id
        });

        // Small per-channel cyclic shift emulates phase lag through the
        // network; kept modest relative to a typical P so it stays a lag,
        // not a wraparound.
        let shift = (0..channels).map(|i| i % 3).collect();

        Self { channels, transfer, shift }
    }

    /// `out_block` is P x N sample-major. Returns `transfer · out[k,:] +
    /// noise` per sample, with each channel's row cyclically shifted by
    /// its configured lag.
    pub fn apply(&self, out_block: &[f64], points: usize, noise_amplitude: f64) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        let mut mixed = vec![0.0; points * self.channels];
        for k in 0..points {
            let row = &out_block[k * self.channels..k * self.channels + self.channels];
            let projected = linalg::mat_vec(&self.transfer, row, self.channels);
            for i in 0..self.channels {
                mixed[k * self.channels + i] =
                    projected[i] + rng.gen_range(-noise_amplitude..=noise_amplitude);
            }
        }

        let mut shifted = mixed.clone();
        for i in 0..self.channels {
            let s = self.shift[i];
            if s == 0 {
                continue;
            }
            for k in 0..points {
                let src = (k + points - s) % points;
                shifted[k * self.channels + i] = mixed[src * self.channels + i];
            }
        }
        shifted
    }
}

struct SharedState {
    output: Mutex<Vec<f64>>,
    input: Mutex<Vec<f64>>,
    model: Mutex<TransferMatrixModel>,
}

pub struct SimulationDaq {
    channels: usize,
    points: usize,
    frequency: f64,
    noise_amplitude: f64,
    shared: Arc<SharedState>,
    thread: Option<JoinHandle<()>>,
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    data_ready_tx: crossbeam_channel::Sender<()>,
    data_ready_rx: crossbeam_channel::Receiver<()>,
}

impl SimulationDaq {
    pub fn new(channels: usize, points: usize, frequency: f64) -> Self {
        let (data_ready_tx, data_ready_rx) = crossbeam_channel::unbounded();
        Self {
            channels,
            points,
            frequency,
            noise_amplitude: 1e-3,
            shared: Arc::new(SharedState {
                output: Mutex::new(vec![0.0; points * channels]),
                input: Mutex::new(vec![0.0; points * channels]),
                model: Mutex::new(TransferMatrixModel::new(channels, 1.0)),
            }),
            thread: None,
            stop_tx: None,
            data_ready_tx,
            data_ready_rx,
        }
    }
}

impl DaqPort for SimulationDaq {
    fn set_channels(&mut self, _spec: ChannelSpec) {
        // The simulation backend has no device-specific channel names.
    }

    fn set_clocks(&mut self, _clocks: ClockConfig) {
        // No hardware clock routing to configure.
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    fn init(&mut self) -> Result<(), DaqError> {
        log::info!(
            "simulation DAQ initialized: {} channels, {} points, {} Hz",
            self.channels,
            self.points,
            self.frequency
        );
        Ok(())
    }

    fn start(&mut self) -> Result<(), DaqError> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        self.stop_tx = Some(stop_tx);

        let shared = Arc::clone(&self.shared);
        let data_ready_tx = self.data_ready_tx.clone();
        let period = Duration::from_secs_f64(self.points as f64 / self.frequency);
        let points = self.points;
        let noise_amplitude = self.noise_amplitude;

        self.thread = Some(std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(period) {
                Ok(()) => break,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    let out = shared.output.lock().clone();
                    let model = shared.model.lock();
                    let next_in = model.apply(&out, points, noise_amplitude);
                    drop(model);
                    *shared.input.lock() = next_in;
                    if data_ready_tx.send(()).is_err() {
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn set_output(&self, block: &[f64]) {
        debug_assert_eq!(block.len(), self.points * self.channels);
        self.shared.output.lock().copy_from_slice(block);
    }

    fn get_input(&self) -> Vec<f64> {
        self.shared.input.lock().clone()
    }

    fn data_ready(&self) -> crossbeam_channel::Receiver<()> {
        self.data_ready_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_matrix_identity_resistance_zero_is_identity() {
        let model = TransferMatrixModel::new(3, 0.0);
        let input = vec![1.0, 2.0, -1.0];
        let out_block: Vec<f64> = input.clone();
        let result = model.apply(&out_block, 1, 0.0);
        for (a, b) in result.iter().zip(&input) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn simulation_daq_reports_data_ready_after_start() {
        let mut daq = SimulationDaq::new(2, 16, 2000.0);
        daq.init().unwrap();
        daq.set_output(&vec![0.0; 32]);
        daq.start().unwrap();
        let rx = daq.data_ready();
        let got = rx.recv_timeout(Duration::from_secs(2));
        daq.stop();
        assert!(got.is_ok(), "expected at least one data_ready tick");
    }
}
