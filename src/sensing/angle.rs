// src/sensing/angle.rs - Horizon and rotation angles from the accelerometer
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::control::SignalFilter;
use crate::hardware::{MotionSensor, SensorError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AngleSample {
    pub horizon_deg: f64,
    pub rotation_deg: f64,
}

/// Unfiltered `(horizon, rotation)` in degrees for an acceleration vector.
///
/// The horizon (roll) angle is sign-inverted so that tilting the instrument up
/// reads positive.
pub fn tilt_angles(accel: [f64; 3]) -> (f64, f64) {
    let [ax, ay, az] = accel;
    let horizon = -ay.atan2(az).to_degrees();
    let rotation = ax.atan2(az).to_degrees();
    (horizon, rotation)
}

pub struct AngleEstimator {
    sensor: Box<dyn MotionSensor>,
    horizon: SignalFilter,
    rotation: SignalFilter,
}

impl AngleEstimator {
    pub fn new(sensor: Box<dyn MotionSensor>, window: usize) -> Self {
        Self {
            sensor,
            horizon: SignalFilter::new(window),
            rotation: SignalFilter::new(window),
        }
    }

    /// Read the sensor and return both filtered angles.
    ///
    /// A failed read leaves both filter windows as they were.
    pub fn sample(&mut self) -> Result<AngleSample, SensorError> {
        let motion = self.sensor.read_motion6()?;
        let (horizon, rotation) = tilt_angles(motion.accel);
        Ok(AngleSample {
            horizon_deg: self.horizon.filter(horizon),
            rotation_deg: self.rotation.filter(rotation),
        })
    }
}

/// Take one sample on the blocking pool.
///
/// The estimator stays locked until the bus read returns, so a stalled sensor
/// holds up other samplers but never an async worker.
pub async fn sample_blocking(estimator: Arc<Mutex<AngleEstimator>>) -> Result<AngleSample, SensorError> {
    let mut estimator = estimator.lock_owned().await;
    tokio::task::spawn_blocking(move || estimator.sample())
        .await
        .map_err(|e| SensorError::Bus(format!("sensor read task failed: {}", e)))?
}
