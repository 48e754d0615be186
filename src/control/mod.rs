// src/control/mod.rs - Signal smoothing and feedback control
pub mod filter;
pub mod pi;

pub use filter::SignalFilter;
pub use pi::{ControlState, PiController, PiGains, Polarity};
