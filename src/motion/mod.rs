// src/motion/mod.rs - Axis identities, motion commands and the per-axis motion primitives
pub mod controller;
pub mod stepper;

pub use controller::{AxisState, MotorController};
pub use stepper::{AxisDriver, StepReport};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected at the call boundary, before any hardware is touched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("unknown axis {0}; expected 0 (horizon) or 1 (rotation)")]
    UnknownAxis(usize),
    #[error("step count must be non-negative, got {0}")]
    NegativeSteps(i64),
    #[error("step count does not fit the axis counter")]
    StepCountOverflow,
    #[error("invalid motion input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisId {
    Horizon,
    Rotation,
}

impl AxisId {
    pub const ALL: [AxisId; 2] = [AxisId::Horizon, AxisId::Rotation];

    pub fn index(self) -> usize {
        match self {
            AxisId::Horizon => 0,
            AxisId::Rotation => 1,
        }
    }

    pub fn from_index(index: usize) -> Result<Self, MotionError> {
        match index {
            0 => Ok(AxisId::Horizon),
            1 => Ok(AxisId::Rotation),
            other => Err(MotionError::UnknownAxis(other)),
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisId::Horizon => write!(f, "horizon"),
            AxisId::Rotation => write!(f, "rotation"),
        }
    }
}

impl FromStr for AxisId {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizon" | "h" => Ok(AxisId::Horizon),
            "rotation" | "r" => Ok(AxisId::Rotation),
            other => other
                .parse::<usize>()
                .map_err(|_| MotionError::InvalidInput(format!("unknown axis '{s}'")))
                .and_then(AxisId::from_index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[serde(alias = "cw")]
    Clockwise,
    #[serde(alias = "ccw")]
    CounterClockwise,
}

impl Direction {
    /// Contribution of one pulse to the net step count.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Clockwise => 1,
            Direction::CounterClockwise => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Clockwise => write!(f, "cw"),
            Direction::CounterClockwise => write!(f, "ccw"),
        }
    }
}

impl FromStr for Direction {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cw" | "clockwise" => Ok(Direction::Clockwise),
            "ccw" | "counterclockwise" | "counter_clockwise" | "counter-clockwise" => {
                Ok(Direction::CounterClockwise)
            }
            _ => Err(MotionError::InvalidInput(format!("unknown direction '{s}'"))),
        }
    }
}

/// One "move N steps" request. Consumed exactly once by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub axis: AxisId,
    pub direction: Direction,
    pub steps: u64,
}

impl MotionCommand {
    pub fn new(axis: AxisId, direction: Direction, steps: u64) -> Self {
        Self {
            axis,
            direction,
            steps,
        }
    }

    /// Validate untyped input from a front end.
    pub fn checked(axis_index: usize, direction: Direction, steps: i64) -> Result<Self, MotionError> {
        let axis = AxisId::from_index(axis_index)?;
        if steps < 0 {
            return Err(MotionError::NegativeSteps(steps));
        }
        Ok(Self::new(axis, direction, steps as u64))
    }

    /// Whole steps for `revolutions` turns; the sign picks the direction.
    pub fn from_revolutions(
        axis: AxisId,
        revolutions: f64,
        steps_per_revolution: u32,
    ) -> Result<Self, MotionError> {
        if !revolutions.is_finite() {
            return Err(MotionError::InvalidInput(format!(
                "revolutions must be finite, got {revolutions}"
            )));
        }
        let steps = (revolutions.abs() * steps_per_revolution as f64).trunc();
        if steps > i64::MAX as f64 {
            return Err(MotionError::StepCountOverflow);
        }
        let direction = if revolutions < 0.0 {
            Direction::CounterClockwise
        } else {
            Direction::Clockwise
        };
        Ok(Self::new(axis, direction, steps as u64))
    }

    /// The move that brings a net count of `position` back to zero.
    pub fn toward_zero(axis: AxisId, position: i64) -> Self {
        let direction = if position > 0 {
            Direction::CounterClockwise
        } else {
            Direction::Clockwise
        };
        Self::new(axis, direction, position.unsigned_abs())
    }
}

/// Net step count of one axis, shared between the driver and its readers.
#[derive(Debug, Clone, Default)]
pub struct PositionCounter(Arc<AtomicI64>);

impl PositionCounter {
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::AcqRel);
    }
}

/// Cooperative stop flag, one per motion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
