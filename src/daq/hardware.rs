//! Two-thread hardware backend. The device driver itself is abstracted
//! behind `OutputDriver`/`InputDriver` — the specific NI-DAQmx (or
//! equivalent) bindings are a deployment detail outside this crate; this
//! module owns the thread topology and buffer handoff around whatever
//! driver is plugged in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::DaqError;

use super::{ChannelSpec, ClockConfig, DaqPort};

/// Blocks until the device's on-board output memory is empty, then writes
/// one P x N (sample-major) buffer.
pub trait OutputDriver: Send + 'static {
    fn write_blocking(&mut self, block: &[f64]) -> Result<(), DaqError>;
}

/// Blocks until one scratch buffer of `points * (channels + 1)` samples is
/// available, channel-major, with channel 0 a duplicate inserted by the
/// multiplexer and discarded by the caller.
pub trait InputDriver: Send + 'static {
    fn read_blocking(&mut self, scratch: &mut [f64]) -> Result<(), DaqError>;
}

type DriverFactory<D> =
    Box<dyn FnMut(&ChannelSpec, &ClockConfig, f64, usize) -> Result<D, DaqError> + Send>;

struct SharedBuffers {
    output: Mutex<Vec<f64>>,
    input: Mutex<Vec<f64>>,
}

pub struct HardwareDaq<O: OutputDriver, I: InputDriver> {
    channels: usize,
    points: usize,
    frequency: f64,
    spec: ChannelSpec,
    clocks: ClockConfig,
    output_factory: DriverFactory<O>,
    input_factory: DriverFactory<I>,
    output_driver: Option<O>,
    input_driver: Option<I>,
    shared: Arc<SharedBuffers>,
    running: Arc<AtomicBool>,
    output_thread: Option<JoinHandle<()>>,
    input_thread: Option<JoinHandle<()>>,
    data_ready_tx: crossbeam_channel::Sender<()>,
    data_ready_rx: crossbeam_channel::Receiver<()>,
}

impl<O: OutputDriver, I: InputDriver> HardwareDaq<O, I> {
    pub fn new(
        channels: usize,
        points: usize,
        output_factory: DriverFactory<O>,
        input_factory: DriverFactory<I>,
    ) -> Self {
        let (data_ready_tx, data_ready_rx) = crossbeam_channel::unbounded();
        Self {
            channels,
            points,
            frequency: 0.0,
            spec: ChannelSpec::default(),
            clocks: ClockConfig::default(),
            output_factory,
            input_factory,
            output_driver: None,
            input_driver: None,
            shared: Arc::new(SharedBuffers {
                output: Mutex::new(vec![0.0; points * channels]),
                input: Mutex::new(vec![0.0; points * channels]),
            }),
            running: Arc::new(AtomicBool::new(false)),
            output_thread: None,
            input_thread: None,
            data_ready_tx,
            data_ready_rx,
        }
    }
}

impl<O: OutputDriver, I: InputDriver> DaqPort for HardwareDaq<O, I> {
    fn set_channels(&mut self, spec: ChannelSpec) {
        self.spec = spec;
    }

    fn set_clocks(&mut self, clocks: ClockConfig) {
        self.clocks = clocks;
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Builds the driver instances. The output device is the clock master:
    /// its sample clock is routed to the input device's clock terminal, so
    /// the output driver must exist before the input driver is configured
    /// against it.
    fn init(&mut self) -> Result<(), DaqError> {
        let output = (self.output_factory)(&self.spec, &self.clocks, self.frequency, self.points)?;
        let input = (self.input_factory)(&self.spec, &self.clocks, self.frequency, self.points)?;
        self.output_driver = Some(output);
        self.input_driver = Some(input);
        log::info!(
            "hardware DAQ initialized: {} channels, {} points, {} Hz",
            self.channels,
            self.points,
            self.frequency
        );
        Ok(())
    }

    /// Starts the input task before the output task's first write, so
    /// acquisition is running when the shared sample clock begins ticking.
    fn start(&mut self) -> Result<(), DaqError> {
        let mut input_driver = self
            .input_driver
            .take()
            .ok_or_else(|| DaqError::InitFailed("input driver not initialized".into()))?;
        let mut output_driver = self
            .output_driver
            .take()
            .ok_or_else(|| DaqError::InitFailed("output driver not initialized".into()))?;

        self.running.store(true, Ordering::SeqCst);

        let channels = self.channels;
        let points = self.points;

        let input_shared = Arc::clone(&self.shared);
        let input_running = Arc::clone(&self.running);
        let input_ready_tx = self.data_ready_tx.clone();
        self.input_thread = Some(std::thread::spawn(move || {
            let mut scratch = vec![0.0; points * (channels + 1)];
            while input_running.load(Ordering::SeqCst) {
                if let Err(e) = input_driver.read_blocking(&mut scratch) {
                    log::warn!("DAQ input read failed: {e}");
                    continue;
                }
                // Discard the first P samples: the duplicated multiplexer
                // channel. The remainder is channel-major; transpose it
                // into the sample-major layout the engine expects.
                let mut in_block = vec![0.0; points * channels];
                for ch in 0..channels {
                    let src_start = points + ch * points;
                    for k in 0..points {
                        in_block[k * channels + ch] = scratch[src_start + k];
                    }
                }
                *input_shared.input.lock() = in_block;
                let _ = input_ready_tx.send(());
            }
        }));

        let output_shared = Arc::clone(&self.shared);
        let output_running = Arc::clone(&self.running);
        let output_ready_tx = self.data_ready_tx.clone();
        self.output_thread = Some(std::thread::spawn(move || {
            while output_running.load(Ordering::SeqCst) {
                let block = output_shared.output.lock().clone();
                if let Err(e) = output_driver.write_blocking(&block) {
                    log::warn!("DAQ output write failed: {e}");
                    continue;
                }
                let _ = output_ready_tx.send(());
            }
        }));

        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.output_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.input_thread.take() {
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
    use std::time::Duration;

    struct LoopbackOutput {
        loopback: Arc<Mutex<Vec<f64>>>,
    }
    impl OutputDriver for LoopbackOutput {
        fn write_blocking(&mut self, block: &[f64]) -> Result<(), DaqError> {
            *self.loopback.lock() = block.to_vec();
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }
    }

    struct LoopbackInput {
        loopback: Arc<Mutex<Vec<f64>>>,
        channels: usize,
        points: usize,
    }
    impl InputDriver for LoopbackInput {
        fn read_blocking(&mut self, scratch: &mut [f64]) -> Result<(), DaqError> {
            std::thread::sleep(Duration::from_millis(1));
            let out = self.loopback.lock().clone();
            // Duplicate channel 0 into the scratch's leading P samples, per
            // the real multiplexer artifact this buffer is modeling.
            for k in 0..self.points {
                scratch[k] = out.get(k * self.channels).copied().unwrap_or(0.0);
            }
            for ch in 0..self.channels {
                for k in 0..self.points {
                    scratch[self.points + ch * self.points + k] = out[k * self.channels + ch];
                }
            }
            Ok(())
        }
    }

    #[test]
    fn two_thread_loopback_round_trips_a_buffer() {
        let loopback = Arc::new(Mutex::new(vec![0.0; 4 * 2]));
        let channels = 2;
        let points = 4;

        let lb_out = Arc::clone(&loopback);
        let lb_in = Arc::clone(&loopback);
        let output_factory: DriverFactory<LoopbackOutput> =
            Box::new(move |_, _, _, _| Ok(LoopbackOutput { loopback: Arc::clone(&lb_out) }));
        let input_factory: DriverFactory<LoopbackInput> = Box::new(move |_, _, _, _| {
            Ok(LoopbackInput { loopback: Arc::clone(&lb_in), channels, points })
        });

        let mut daq = HardwareDaq::new(channels, points, output_factory, input_factory);
        daq.set_frequency(1000.0);
        daq.init().unwrap();

        let sent = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        daq.set_output(&sent);
        daq.start().unwrap();

        let rx = daq.data_ready();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let received = daq.get_input();
        daq.stop();
        assert_eq!(received.len(), sent.len());
    }
}
