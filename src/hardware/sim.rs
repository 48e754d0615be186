// src/hardware/sim.rs - Simulated pins and sensors for bench runs and tests
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::io::AsyncWriteExt;

use super::serial::BoxedReader;
use super::{AxisPins, MagneticSensor, Motion6, MotionSensor, PinLevel, SensorError};
use crate::motion::PositionCounter;

/// One recorded GPIO write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    pub pin: u8,
    pub level: PinLevel,
}

/// Shared, append-only record of pin writes.
#[derive(Debug, Clone, Default)]
pub struct PinLog {
    writes: Arc<Mutex<Vec<PinWrite>>>,
}

impl PinLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, pin: u8, level: PinLevel) {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(PinWrite { pin, level });
        }
    }

    pub fn snapshot(&self) -> Vec<PinWrite> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes to `pin`, in order.
    pub fn levels(&self, pin: u8) -> Vec<PinLevel> {
        self.snapshot()
            .into_iter()
            .filter(|w| w.pin == pin)
            .map(|w| w.level)
            .collect()
    }

    /// Number of rising edges seen on `pin`.
    pub fn pulses(&self, pin: u8) -> usize {
        self.levels(pin)
            .iter()
            .filter(|level| **level == PinLevel::High)
            .count()
    }
}

/// Stepper pin pair that only logs.
#[derive(Debug)]
pub struct SimPins {
    dir_pin: u8,
    step_pin: u8,
    log: Option<PinLog>,
    released: bool,
}

impl SimPins {
    pub fn new(dir_pin: u8, step_pin: u8) -> Self {
        tracing::debug!("Simulated stepper pins dir={} step={}", dir_pin, step_pin);
        Self {
            dir_pin,
            step_pin,
            log: None,
            released: false,
        }
    }

    pub fn with_log(mut self, log: PinLog) -> Self {
        self.log = Some(log);
        self
    }

    fn write(&self, pin: u8, level: PinLevel) {
        tracing::trace!("sim pin {} -> {:?}", pin, level);
        if let Some(log) = &self.log {
            log.record(pin, level);
        }
    }
}

impl AxisPins for SimPins {
    fn set_direction(&mut self, level: PinLevel) {
        self.write(self.dir_pin, level);
    }

    fn set_step(&mut self, level: PinLevel) {
        self.write(self.step_pin, level);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.write(self.step_pin, PinLevel::Low);
        tracing::debug!("Released simulated pins dir={} step={}", self.dir_pin, self.step_pin);
    }
}

enum ImuScriptEntry {
    Angle(f64),
    Failure,
}

enum ImuMode {
    Fixed {
        horizon_deg: f64,
        rotation_deg: f64,
        noise_deg: f64,
    },
    Scripted {
        script: VecDeque<ImuScriptEntry>,
        last: f64,
    },
}

/// Inertial sensor that reports a chosen orientation.
///
/// A scripted IMU replays horizon angles one per read and then holds the last
/// one; rotation stays level.
pub struct SimImu {
    mode: ImuMode,
}

impl SimImu {
    pub fn fixed(horizon_deg: f64, rotation_deg: f64, noise_deg: f64) -> Self {
        Self {
            mode: ImuMode::Fixed {
                horizon_deg,
                rotation_deg,
                noise_deg,
            },
        }
    }

    pub fn scripted(horizon_angles: impl IntoIterator<Item = f64>) -> Self {
        Self {
            mode: ImuMode::Scripted {
                script: horizon_angles.into_iter().map(ImuScriptEntry::Angle).collect(),
                last: 0.0,
            },
        }
    }

    /// Queue a failed read after the scripted angles so far.
    pub fn then_fail(mut self) -> Self {
        if let ImuMode::Scripted { script, .. } = &mut self.mode {
            script.push_back(ImuScriptEntry::Failure);
        }
        self
    }

    /// Queue one more horizon angle.
    pub fn then_angle(mut self, horizon_deg: f64) -> Self {
        if let ImuMode::Scripted { script, .. } = &mut self.mode {
            script.push_back(ImuScriptEntry::Angle(horizon_deg));
        }
        self
    }

    fn orientation(&mut self) -> Result<(f64, f64), SensorError> {
        match &mut self.mode {
            ImuMode::Fixed {
                horizon_deg,
                rotation_deg,
                noise_deg,
            } => {
                let (mut h, mut r) = (*horizon_deg, *rotation_deg);
                if *noise_deg > 0.0 {
                    let mut rng = rand::rng();
                    h += rng.random_range(-*noise_deg..=*noise_deg);
                    r += rng.random_range(-*noise_deg..=*noise_deg);
                }
                Ok((h, r))
            }
            ImuMode::Scripted { script, last } => match script.pop_front() {
                Some(ImuScriptEntry::Angle(angle)) => {
                    *last = angle;
                    Ok((angle, 0.0))
                }
                Some(ImuScriptEntry::Failure) => {
                    Err(SensorError::Bus("scripted read failure".to_string()))
                }
                None => Ok((*last, 0.0)),
            },
        }
    }
}

/// Raw counts for 1 g at the default accelerometer range.
const ONE_G: f64 = 16384.0;

impl MotionSensor for SimImu {
    fn read_motion6(&mut self) -> Result<Motion6, SensorError> {
        let (horizon_deg, rotation_deg) = self.orientation()?;
        // Inverse of the estimator's roll/pitch formulas with az = 1 g.
        let ay = -horizon_deg.to_radians().tan() * ONE_G;
        let ax = rotation_deg.to_radians().tan() * ONE_G;
        Ok(Motion6 {
            gyro: [0.0; 3],
            accel: [ax, ay, ONE_G],
        })
    }
}

/// Magnetometer whose heading turns with an axis' step counter.
pub struct SimCompass {
    counter: PositionCounter,
    heading_deg: f64,
    deg_per_step: f64,
}

impl SimCompass {
    pub fn following(counter: PositionCounter, heading_deg: f64, deg_per_step: f64) -> Self {
        Self {
            counter,
            heading_deg,
            deg_per_step,
        }
    }

    pub fn heading(&self) -> f64 {
        (self.heading_deg + self.counter.get() as f64 * self.deg_per_step).rem_euclid(360.0)
    }
}

impl MagneticSensor for SimCompass {
    fn read_field(&mut self) -> Result<[f64; 3], SensorError> {
        let heading = self.heading().to_radians();
        Ok([heading.cos() * 1000.0, heading.sin() * 1000.0, 0.0])
    }
}

/// Stream of photo-sensor frames around a balanced reading, one per `period`.
///
/// The generator stops when the returned reader is dropped.
pub fn spawn_photo_sensor(period: Duration) -> BoxedReader {
    let (mut tx, rx) = tokio::io::duplex(256);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let line = {
                let mut rng = rand::rng();
                let values: Vec<String> = (0..4)
                    .map(|_| rng.random_range(480..=520).to_string())
                    .collect();
                format!("{}\n", values.join(","))
            };
            if tx.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        tracing::debug!("Simulated photo sensor stopped");
    });
    Box::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_record_and_release_once() {
        let log = PinLog::new();
        let mut pins = SimPins::new(20, 21).with_log(log.clone());
        pins.set_direction(PinLevel::High);
        pins.set_step(PinLevel::High);
        pins.set_step(PinLevel::Low);
        pins.release();
        pins.release();

        assert_eq!(log.levels(20), vec![PinLevel::High]);
        assert_eq!(log.levels(21), vec![PinLevel::High, PinLevel::Low, PinLevel::Low]);
        assert_eq!(log.pulses(21), 1);
    }

    #[test]
    fn test_scripted_imu_holds_last_angle() {
        let mut imu = SimImu::scripted([10.0]).then_fail();
        let first = imu.read_motion6().unwrap();
        assert!((-(first.accel[1].atan2(first.accel[2])).to_degrees() - 10.0).abs() < 1e-9);
        assert!(imu.read_motion6().is_err());
        let held = imu.read_motion6().unwrap();
        assert_eq!(held.accel, first.accel);
    }

    #[test]
    fn test_fixed_imu_noise_is_bounded() {
        let mut imu = SimImu::fixed(30.0, -15.0, 0.5);
        for _ in 0..50 {
            let m = imu.read_motion6().unwrap();
            let horizon = -(m.accel[1].atan2(m.accel[2])).to_degrees();
            let rotation = m.accel[0].atan2(m.accel[2]).to_degrees();
            assert!((horizon - 30.0).abs() <= 0.5 + 1e-9);
            assert!((rotation + 15.0).abs() <= 0.5 + 1e-9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_photo_sensor_emits_frames() {
        use crate::hardware::serial::FrameReader;

        let mut reader = FrameReader::new(spawn_photo_sensor(Duration::from_millis(100)), None);
        for _ in 0..3 {
            let frame = reader.next_frame().await.unwrap();
            assert!(frame.values.iter().all(|v| (480..=520).contains(v)));
        }
    }

    #[test]
    fn test_compass_follows_counter() {
        let counter = PositionCounter::default();
        let compass = SimCompass::following(counter.clone(), 350.0, 2.0);
        assert!((compass.heading() - 350.0).abs() < 1e-9);
        counter.add(10);
        assert!((compass.heading() - 10.0).abs() < 1e-9);
    }
}
