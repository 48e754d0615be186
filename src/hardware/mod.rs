// src/hardware/mod.rs - Hardware boundary: stepper pins, inertial sensor, compass, photo sensor
pub mod bmi160;
pub mod qmc5883;
pub mod serial;
pub mod sim;

#[cfg(feature = "rpi")]
pub mod rpi;

use std::ops::Not;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Setup-time failures. Any of these aborts startup after pins are released.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO setup failed for pin {pin}: {reason}")]
    PinSetup { pin: u8, reason: String },
    #[error("I2C bus {bus} setup failed: {reason}")]
    BusSetup { bus: u8, reason: String },
    #[error("serial port '{port}' could not be opened: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sensor at address {address:#04x} did not respond as expected: {reason}")]
    SensorProbe { address: u16, reason: String },
    #[error("hardware backend '{0}' is not available in this build")]
    BackendUnavailable(String),
}

/// Runtime read failures. Recoverable: the caller skips the tick.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("bus read failed: {0}")]
    Bus(String),
    #[error("no data within {0:?}")]
    Timeout(Duration),
    #[error("malformed frame '{line}': {reason}")]
    MalformedFrame { line: String, reason: String },
    #[error("sensor stream closed")]
    Closed,
}

/// Logic level of a GPIO output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinLevel {
    Low,
    High,
}

impl Not for PinLevel {
    type Output = PinLevel;

    fn not(self) -> PinLevel {
        match self {
            PinLevel::Low => PinLevel::High,
            PinLevel::High => PinLevel::Low,
        }
    }
}

impl From<bool> for PinLevel {
    fn from(high: bool) -> Self {
        if high { PinLevel::High } else { PinLevel::Low }
    }
}

/// The direction/step output pair of one stepper axis.
///
/// Writes are infallible once the pins have been claimed; claiming them is
/// where a backend reports [`HardwareError::PinSetup`].
pub trait AxisPins: Send {
    fn set_direction(&mut self, level: PinLevel);
    fn set_step(&mut self, level: PinLevel);
    /// Deassert both outputs and give them back. Must be idempotent.
    fn release(&mut self);
}

/// One 6-axis inertial sample in raw sensor units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion6 {
    pub gyro: [f64; 3],
    pub accel: [f64; 3],
}

pub trait MotionSensor: Send {
    fn read_motion6(&mut self) -> Result<Motion6, SensorError>;
}

/// Three-axis magnetometer reading in raw sensor units.
pub trait MagneticSensor: Send {
    fn read_field(&mut self) -> Result<[f64; 3], SensorError>;
}

/// Register-level access to an I2C device, implemented by the bus backend.
pub trait RegisterBus: Send {
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError>;
    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), SensorError>;
}

/// Little-endian signed 16-bit word at `offset`.
pub(crate) fn le_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_level_inversion() {
        assert_eq!(!PinLevel::High, PinLevel::Low);
        assert_eq!(!PinLevel::Low, PinLevel::High);
        assert_eq!(PinLevel::from(true), PinLevel::High);
    }

    #[test]
    fn test_le_i16_decodes_negative_values() {
        let buf = [0x00, 0x80, 0xff, 0x7f];
        assert_eq!(le_i16(&buf, 0), i16::MIN);
        assert_eq!(le_i16(&buf, 2), i16::MAX);
    }
}
