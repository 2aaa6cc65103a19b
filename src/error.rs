//! Error kinds for the control loop and its supporting layers.
//!
//! The engine step itself never returns an error: numeric degeneracies
//! (a singular bias mixer, a zero-denominator autotune) are handled by
//! falling back to a safe default and are only ever logged. These types
//! exist for the layers around the step: configuration loading, DAQ
//! initialization, and the TCP control surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("channel count {0} out of range [1, 64]")]
    ChannelsOutOfRange(usize),
    #[error("points per period {0} out of range [2, 10000]")]
    PointsOutOfRange(usize),
}

#[derive(Debug, Error)]
pub enum DaqError {
    #[error("DAQ initialization failed: {0}")]
    InitFailed(String),
    #[error("DAQ write failed: {0}")]
    WriteFailed(String),
    #[error("DAQ read failed: {0}")]
    ReadFailed(String),
}

#[derive(Debug, Error)]
pub enum TcpError {
    #[error("failed to bind TCP listener on {addr}: {source}")]
    ListenFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("wrong number of arguments for {command}: expected {expected}, got {got}")]
    WrongArity {
        command: String,
        expected: usize,
        got: usize,
    },
    #[error("could not parse argument {arg:?}: {source}")]
    BadArgument {
        arg: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("channel index {0} out of range")]
    ChannelOutOfRange(usize),
}

/// Numeric degeneracies. These never propagate out of the engine; they are
/// logged and the caller falls back to a safe default (identity mix,
/// unchanged gain).
#[derive(Debug, Error)]
pub enum NumericError {
    #[error("bias mixer matrix is singular, falling back to identity")]
    SingularMixer,
    #[error("autotune denominator is zero, leaving ki unchanged")]
    ZeroAutotuneDenominator,
}
