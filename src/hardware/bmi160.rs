// src/hardware/bmi160.rs - BMI160 6-axis IMU over a register bus
use std::time::Duration;

use super::{HardwareError, Motion6, MotionSensor, RegisterBus, SensorError, le_i16};

/// Address with SDO pulled high, as wired on the mount.
pub const DEFAULT_ADDRESS: u16 = 0x69;

const REG_CHIP_ID: u8 = 0x00;
const REG_DATA_GYRO_X: u8 = 0x0C;
const REG_CMD: u8 = 0x7E;

const CHIP_ID: u8 = 0xD1;
const CMD_ACCEL_NORMAL: u8 = 0x11;
const CMD_GYRO_NORMAL: u8 = 0x15;

// Power-up times from the datasheet.
const ACCEL_STARTUP: Duration = Duration::from_millis(5);
const GYRO_STARTUP: Duration = Duration::from_millis(81);

pub struct Bmi160<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Bmi160<B> {
    /// Probe the chip id and bring accelerometer and gyro out of suspend.
    pub fn new(mut bus: B, address: u16) -> Result<Self, HardwareError> {
        let mut id = [0u8; 1];
        bus.read_block(REG_CHIP_ID, &mut id)
            .map_err(|e| HardwareError::SensorProbe { address, reason: e.to_string() })?;
        if id[0] != CHIP_ID {
            return Err(HardwareError::SensorProbe {
                address,
                reason: format!("unexpected chip id {:#04x}", id[0]),
            });
        }

        bus.write_byte(REG_CMD, CMD_ACCEL_NORMAL)
            .map_err(|e| HardwareError::SensorProbe { address, reason: e.to_string() })?;
        std::thread::sleep(ACCEL_STARTUP);
        bus.write_byte(REG_CMD, CMD_GYRO_NORMAL)
            .map_err(|e| HardwareError::SensorProbe { address, reason: e.to_string() })?;
        std::thread::sleep(GYRO_STARTUP);

        tracing::info!("BMI160 ready at {:#04x}", address);
        Ok(Self { bus })
    }
}

impl<B: RegisterBus> MotionSensor for Bmi160<B> {
    fn read_motion6(&mut self) -> Result<Motion6, SensorError> {
        // gyro x/y/z followed by accel x/y/z
        let mut raw = [0u8; 12];
        self.bus.read_block(REG_DATA_GYRO_X, &mut raw)?;
        let word = |i: usize| le_i16(&raw, i * 2) as f64;
        Ok(Motion6 {
            gyro: [word(0), word(1), word(2)],
            accel: [word(3), word(4), word(5)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeBus {
        registers: HashMap<u8, Vec<u8>>,
        writes: Vec<(u8, u8)>,
        fail_reads: bool,
    }

    impl RegisterBus for FakeBus {
        fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
            if self.fail_reads {
                return Err(SensorError::Bus("nack".to_string()));
            }
            let data = self.registers.get(&register).cloned().unwrap_or_default();
            for (i, b) in buf.iter_mut().enumerate() {
                *b = data.get(i).copied().unwrap_or(0);
            }
            Ok(())
        }

        fn write_byte(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
            self.writes.push((register, value));
            Ok(())
        }
    }

    fn bus_with_chip_id(id: u8) -> FakeBus {
        let mut bus = FakeBus::default();
        bus.registers.insert(REG_CHIP_ID, vec![id]);
        bus
    }

    #[test]
    fn test_init_powers_up_sensors() {
        let imu = Bmi160::new(bus_with_chip_id(CHIP_ID), DEFAULT_ADDRESS).unwrap();
        assert_eq!(imu.bus.writes, vec![(REG_CMD, CMD_ACCEL_NORMAL), (REG_CMD, CMD_GYRO_NORMAL)]);
    }

    #[test]
    fn test_init_rejects_wrong_chip() {
        let result = Bmi160::new(bus_with_chip_id(0x00), DEFAULT_ADDRESS);
        assert!(matches!(result, Err(HardwareError::SensorProbe { address: 0x69, .. })));
    }

    #[test]
    fn test_read_splits_gyro_and_accel() {
        let mut bus = bus_with_chip_id(CHIP_ID);
        let words: [i16; 6] = [1, -2, 3, 100, -16384, 16384];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bus.registers.insert(REG_DATA_GYRO_X, bytes);
        let mut imu = Bmi160::new(bus, DEFAULT_ADDRESS).unwrap();

        let sample = imu.read_motion6().unwrap();
        assert_eq!(sample.gyro, [1.0, -2.0, 3.0]);
        assert_eq!(sample.accel, [100.0, -16384.0, 16384.0]);
    }

    #[test]
    fn test_read_failure_is_recoverable_error() {
        let mut imu = Bmi160::new(bus_with_chip_id(CHIP_ID), DEFAULT_ADDRESS).unwrap();
        imu.bus.fail_reads = true;
        assert!(matches!(imu.read_motion6(), Err(SensorError::Bus(_))));
    }
}
