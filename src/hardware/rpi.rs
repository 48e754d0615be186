// src/hardware/rpi.rs - Raspberry Pi GPIO and I2C through rppal
use rppal::gpio::{Gpio, Level, OutputPin};
use rppal::i2c::I2c;

use super::{AxisPins, HardwareError, PinLevel, RegisterBus, SensorError};

impl From<PinLevel> for Level {
    fn from(level: PinLevel) -> Self {
        match level {
            PinLevel::Low => Level::Low,
            PinLevel::High => Level::High,
        }
    }
}

/// BCM-numbered direction/step outputs of one stepper driver.
pub struct GpioAxisPins {
    dir: OutputPin,
    step: OutputPin,
    released: bool,
}

impl GpioAxisPins {
    pub fn claim(gpio: &Gpio, dir_pin: u8, step_pin: u8) -> Result<Self, HardwareError> {
        let claim = |pin: u8| -> Result<OutputPin, HardwareError> {
            gpio.get(pin)
                .map(|p| p.into_output_low())
                .map_err(|e| HardwareError::PinSetup {
                    pin,
                    reason: e.to_string(),
                })
        };
        let dir = claim(dir_pin)?;
        let step = claim(step_pin)?;
        tracing::info!("Claimed GPIO dir={} step={}", dir_pin, step_pin);
        Ok(Self {
            dir,
            step,
            released: false,
        })
    }
}

impl AxisPins for GpioAxisPins {
    fn set_direction(&mut self, level: PinLevel) {
        self.dir.write(level.into());
    }

    fn set_step(&mut self, level: PinLevel) {
        self.step.write(level.into());
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.step.set_low();
        self.dir.set_low();
        // rppal restores the pin mode when the OutputPin drops
        self.step.set_reset_on_drop(true);
        self.dir.set_reset_on_drop(true);
        tracing::debug!("Released GPIO {} and {}", self.dir.pin(), self.step.pin());
    }
}

/// Open the GPIO peripheral once for all axes.
pub fn open_gpio() -> Result<Gpio, HardwareError> {
    Gpio::new().map_err(|e| HardwareError::BackendUnavailable(format!("gpio: {e}")))
}

/// One I2C slave on a Linux I2C bus.
pub struct I2cRegisterBus {
    i2c: I2c,
}

impl I2cRegisterBus {
    pub fn open(bus: u8, address: u16) -> Result<Self, HardwareError> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| HardwareError::BusSetup {
            bus,
            reason: e.to_string(),
        })?;
        i2c.set_slave_address(address)
            .map_err(|e| HardwareError::BusSetup {
                bus,
                reason: format!("address {address:#04x}: {e}"),
            })?;
        Ok(Self { i2c })
    }
}

impl RegisterBus for I2cRegisterBus {
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write_read(&[register], buf)
            .map_err(|e| SensorError::Bus(e.to_string()))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .smbus_write_byte(register, value)
            .map_err(|e| SensorError::Bus(e.to_string()))
    }
}
