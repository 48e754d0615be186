// src/hardware/qmc5883.rs - QMC5883L magnetometer over a register bus
use super::{HardwareError, MagneticSensor, RegisterBus, SensorError, le_i16};

pub const DEFAULT_ADDRESS: u16 = 0x0D;

const REG_DATA_X_LSB: u8 = 0x00;
const REG_MODE: u8 = 0x09;

/// Continuous measurement, 10 Hz, 2 G range, 512x oversampling.
const MODE_CONTINUOUS: u8 = 0x01;

pub struct Qmc5883<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Qmc5883<B> {
    pub fn new(mut bus: B, address: u16) -> Result<Self, HardwareError> {
        bus.write_byte(REG_MODE, MODE_CONTINUOUS)
            .map_err(|e| HardwareError::SensorProbe { address, reason: e.to_string() })?;
        tracing::info!("QMC5883L in continuous mode at {:#04x}", address);
        Ok(Self { bus })
    }
}

impl<B: RegisterBus> MagneticSensor for Qmc5883<B> {
    fn read_field(&mut self) -> Result<[f64; 3], SensorError> {
        let mut raw = [0u8; 6];
        self.bus.read_block(REG_DATA_X_LSB, &mut raw)?;
        Ok([
            le_i16(&raw, 0) as f64,
            le_i16(&raw, 2) as f64,
            le_i16(&raw, 4) as f64,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBus {
        data: [u8; 6],
        writes: Vec<(u8, u8)>,
    }

    impl RegisterBus for FixedBus {
        fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
            assert_eq!(register, REG_DATA_X_LSB);
            buf.copy_from_slice(&self.data[..buf.len()]);
            Ok(())
        }

        fn write_byte(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
            self.writes.push((register, value));
            Ok(())
        }
    }

    #[test]
    fn test_field_is_signed() {
        let bus = FixedBus { data: [0x10, 0x00, 0xf0, 0xff, 0x00, 0x00], writes: Vec::new() };
        let mut compass = Qmc5883::new(bus, DEFAULT_ADDRESS).unwrap();
        assert_eq!(compass.bus.writes, vec![(REG_MODE, MODE_CONTINUOUS)]);
        assert_eq!(compass.read_field().unwrap(), [16.0, -16.0, 0.0]);
    }
}
