//! Non-real-time ingress for setpoint/amplitude/gain/enable/averaging/
//! reference changes from the GUI or TCP surface. Requests are messages,
//! never direct state pokes; they are applied on the engine thread at
//! step boundaries only.

use std::sync::Arc;

use crate::averager::AveragingMode;
use crate::engine::{EngineSnapshot, FeedbackEngine};

pub enum ControlPlaneRequest {
    SetSetpoint { channel: usize, value: f64 },
    /// Only takes effect while `channel` is not feedback-enabled.
    SetAmp { channel: usize, value: f64 },
    SetFeedback { channel: usize, on: bool },
    SetKi(f64),
    SetKp(f64),
    SetReference(Option<usize>),
    SetAveraging { mode: AveragingMode, amount: f64 },
    ResetAveraging,
    Autotune { scale: f64 },
    /// Responds on the embedded one-shot channel with the latest snapshot.
    Snapshot(crossbeam_channel::Sender<Arc<EngineSnapshot>>),
}

/// Clonable producer side, handed to TCP connections and GUI callbacks.
#[derive(Clone)]
pub struct ControlPlaneHandle {
    tx: crossbeam_channel::Sender<ControlPlaneRequest>,
}

impl ControlPlaneHandle {
    pub fn send(&self, request: ControlPlaneRequest) {
        if self.tx.send(request).is_err() {
            log::warn!("control plane request dropped: engine loop is gone");
        }
    }
}

/// Engine-side consumer. `drain_and_apply` is called once per step boundary
/// and must never block — it never runs concurrently with `engine.step`.
pub struct ControlPlane {
    rx: crossbeam_channel::Receiver<ControlPlaneRequest>,
    tx: crossbeam_channel::Sender<ControlPlaneRequest>,
}

impl ControlPlane {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn handle(&self) -> ControlPlaneHandle {
        ControlPlaneHandle { tx: self.tx.clone() }
    }

    pub fn drain_and_apply(&self, engine: &mut FeedbackEngine) {
        while let Ok(request) = self.rx.try_recv() {
            apply(engine, request);
        }
    }
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(engine: &mut FeedbackEngine, request: ControlPlaneRequest) {
    match request {
        ControlPlaneRequest::SetSetpoint { channel, value } => engine.set_setpoint(channel, value),
        ControlPlaneRequest::SetAmp { channel, value } => engine.set_amp(channel, value),
        ControlPlaneRequest::SetFeedback { channel, on } => engine.set_feedback_enabled(channel, on),
        ControlPlaneRequest::SetKi(v) => engine.set_ki(v),
        ControlPlaneRequest::SetKp(v) => engine.set_kp(v),
        ControlPlaneRequest::SetReference(ch) => engine.set_reference(ch),
        ControlPlaneRequest::SetAveraging { mode, amount } => engine.set_averaging(mode, amount),
        ControlPlaneRequest::ResetAveraging => engine.reset_averaging(),
        ControlPlaneRequest::Autotune { scale } => {
            let _ = engine.autotune_pid(scale);
        }
        ControlPlaneRequest::Snapshot(reply) => {
            let _ = reply.send(engine.snapshot());
        }
    }
}
