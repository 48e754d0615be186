// src/motion/stepper.rs - Pulse generation and net position for one stepper axis
use std::time::Duration;

use crate::hardware::{AxisPins, PinLevel};

use super::{AxisId, CancelToken, Direction, PositionCounter};

/// Outcome of one [`AxisDriver::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub direction: Direction,
    pub pulses: u64,
    pub aborted: bool,
    /// Net step count after the last pulse.
    pub position: i64,
}

/// Owns the pins of one axis and its net step count.
///
/// Stepping blocks the calling thread for `2 * pulse_delay` per pulse, so the
/// controller runs it on the blocking pool.
pub struct AxisDriver {
    axis: AxisId,
    pins: Box<dyn AxisPins>,
    pulse_delay: Duration,
    clockwise_level: PinLevel,
    position: PositionCounter,
}

impl AxisDriver {
    pub fn new(
        axis: AxisId,
        pins: Box<dyn AxisPins>,
        pulse_delay: Duration,
        clockwise_level: PinLevel,
    ) -> Self {
        Self {
            axis,
            pins,
            pulse_delay,
            clockwise_level,
            position: PositionCounter::default(),
        }
    }

    /// Share an existing counter, e.g. one a simulated sensor already follows.
    pub fn with_counter(mut self, counter: PositionCounter) -> Self {
        self.position = counter;
        self
    }

    pub fn axis(&self) -> AxisId {
        self.axis
    }

    pub fn position(&self) -> i64 {
        self.position.get()
    }

    pub fn counter(&self) -> PositionCounter {
        self.position.clone()
    }

    fn direction_level(&self, direction: Direction) -> PinLevel {
        match direction {
            Direction::Clockwise => self.clockwise_level,
            Direction::CounterClockwise => !self.clockwise_level,
        }
    }

    /// Issue up to `count` pulses, or pulses until cancelled when `count` is `None`.
    ///
    /// `cancel` is checked before every pulse, so a cancelled motion finishes at
    /// most the pulse already in flight and writes nothing afterwards.
    pub fn step(&mut self, direction: Direction, count: Option<u64>, cancel: &CancelToken) -> StepReport {
        let mut pulses = 0u64;
        let mut aborted = false;

        if count != Some(0) {
            self.pins.set_direction(self.direction_level(direction));
        }

        while count.is_none_or(|limit| pulses < limit) {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }
            self.pins.set_step(PinLevel::High);
            std::thread::sleep(self.pulse_delay);
            self.pins.set_step(PinLevel::Low);
            std::thread::sleep(self.pulse_delay);

            self.position.add(direction.sign());
            pulses += 1;
        }

        StepReport {
            direction,
            pulses,
            aborted,
            position: self.position.get(),
        }
    }

    /// Deassert the outputs. Safe to call more than once.
    pub fn release(&mut self) {
        self.pins.release();
    }
}

impl Drop for AxisDriver {
    fn drop(&mut self) {
        self.pins.release();
    }
}
