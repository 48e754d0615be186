// src/control/pi.rs - PI controller mapping a light differential to step commands
use serde::{Deserialize, Serialize};

use crate::motion::{AxisId, Direction, MotionCommand};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiGains {
    pub kp: f64,
    pub ki: f64,
    /// Output clamp, in steps.
    pub max_step: f64,
}

impl Default for PiGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            max_step: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlState {
    pub error: f64,
    pub integral: f64,
    pub previous_error: f64,
}

impl PiGains {
    /// One control step. The integral is never reset or limited here.
    pub fn compute(&self, state: ControlState, error: f64) -> (f64, ControlState) {
        let integral = state.integral + error;
        let output = self.kp * error + self.ki * integral;
        let output = output.max(-self.max_step).min(self.max_step);
        let next = ControlState {
            error,
            integral,
            previous_error: state.error,
        };
        (output, next)
    }
}

/// Which output sign turns an axis clockwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Negative output steps clockwise.
    #[default]
    Normal,
    Inverted,
}

impl Polarity {
    pub fn direction(self, output: f64) -> Direction {
        let clockwise = match self {
            Polarity::Normal => output < 0.0,
            Polarity::Inverted => output > 0.0,
        };
        if clockwise {
            Direction::Clockwise
        } else {
            Direction::CounterClockwise
        }
    }

    /// Whole-step motion for a controller output; the fraction is truncated.
    pub fn command(self, axis: AxisId, output: f64) -> MotionCommand {
        MotionCommand::new(axis, self.direction(output), output.trunc().abs() as u64)
    }
}

/// Stateful wrapper used by a single control loop.
#[derive(Debug, Clone)]
pub struct PiController {
    gains: PiGains,
    state: ControlState,
}

impl PiController {
    pub fn new(gains: PiGains) -> Self {
        Self {
            gains,
            state: ControlState::default(),
        }
    }

    pub fn update(&mut self, error: f64) -> f64 {
        let (output, next) = self.gains.compute(self.state, error);
        self.state = next;
        output
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn gains(&self) -> PiGains {
        self.gains
    }
}
