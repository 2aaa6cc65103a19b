pub mod averager;
pub mod bias_mixer;
pub mod config;
pub mod control_plane;
pub mod daq;
pub mod engine;
pub mod error;
pub mod linalg;
pub mod lockin;
pub mod pi_controller;
pub mod sine_source;
pub mod tcp;
