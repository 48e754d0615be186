// src/sensing/compass.rs - Magnetic heading and north alignment of the rotation axis
use std::time::Duration;

use serde::Serialize;

use crate::control::SignalFilter;
use crate::hardware::{MagneticSensor, SensorError};
use crate::motion::{AxisId, Direction, MotionCommand, MotorController};

/// Filters the horizontal field components, not the angle, so readings
/// around north do not average to south.
pub struct HeadingEstimator {
    sensor: Box<dyn MagneticSensor>,
    x: SignalFilter,
    y: SignalFilter,
}

impl HeadingEstimator {
    pub fn new(sensor: Box<dyn MagneticSensor>, window: usize) -> Self {
        Self {
            sensor,
            x: SignalFilter::new(window),
            y: SignalFilter::new(window),
        }
    }

    /// Filtered heading in degrees, in `[0, 360)`.
    pub fn sample(&mut self) -> Result<f64, SensorError> {
        let [x, y, _] = self.sensor.read_field()?;
        let x = self.x.filter(x);
        let y = self.y.filter(y);
        Ok(y.atan2(x).to_degrees().rem_euclid(360.0))
    }

    /// Drop history, e.g. after the axis moved a lot.
    pub fn reset(&mut self) {
        self.x.clear();
        self.y.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlignSettings {
    pub axis: AxisId,
    pub tolerance_deg: f64,
    pub settle: Duration,
    pub max_steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AlignOutcome {
    Aligned { heading: f64, steps: u32 },
    GaveUp { heading: Option<f64>, steps: u32 },
}

/// Is `heading` within `tolerance` of north?
pub fn is_north(heading: f64, tolerance: f64) -> bool {
    heading <= tolerance || heading >= 360.0 - tolerance
}

/// Step `settings.axis` one step at a time until the compass reads north.
///
/// Headings past 180 degrees turn clockwise, the rest counter-clockwise.
/// Failed reads skip an iteration and count against `max_steps` like a step.
pub async fn align_north(
    compass: &mut HeadingEstimator,
    motors: &MotorController,
    settings: AlignSettings,
) -> AlignOutcome {
    let mut steps = 0u32;
    let mut attempts = 0u32;
    let mut last_heading = None;

    tracing::info!(
        "Aligning {} axis to north (tolerance {:.1} deg)",
        settings.axis,
        settings.tolerance_deg
    );

    while attempts < settings.max_steps {
        attempts += 1;
        let heading = match compass.sample() {
            Ok(heading) => heading,
            Err(e) => {
                tracing::warn!("Compass read failed, skipping: {}", e);
                tokio::time::sleep(settings.settle).await;
                continue;
            }
        };
        last_heading = Some(heading);

        if is_north(heading, settings.tolerance_deg) {
            tracing::info!("Aligned to north: heading {:.1} after {} steps", heading, steps);
            return AlignOutcome::Aligned { heading, steps };
        }

        let direction = if heading > 180.0 {
            Direction::Clockwise
        } else {
            Direction::CounterClockwise
        };
        tracing::debug!("Heading {:.1}, stepping {}", heading, direction);
        motors
            .move_axis(MotionCommand::new(settings.axis, direction, 1))
            .await;
        motors.wait_idle(settings.axis).await;
        steps += 1;

        tokio::time::sleep(settings.settle).await;
    }

    tracing::warn!("North alignment gave up after {} steps", steps);
    AlignOutcome::GaveUp {
        heading: last_heading,
        steps,
    }
}
