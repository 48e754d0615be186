// src/tracking/light.rs - Photo-sensor differential to per-axis step commands
use crate::control::{PiController, PiGains, Polarity, SignalFilter};
use crate::hardware::serial::LdrFrame;
use crate::motion::{AxisId, MotionCommand};

#[derive(Debug, Clone, Copy)]
pub struct LightSettings {
    pub window: usize,
    /// Indexed by axis: horizon, rotation.
    pub gains: [PiGains; 2],
    pub polarity: [Polarity; 2],
}

impl Default for LightSettings {
    fn default() -> Self {
        Self {
            window: crate::control::filter::DEFAULT_WINDOW,
            gains: [PiGains::default(); 2],
            polarity: [Polarity::Normal; 2],
        }
    }
}

/// `ldr1 - ldr2` drives the horizon axis, `ldr3 - ldr4` the rotation axis.
pub struct LightTracker {
    channels: [SignalFilter; 4],
    controllers: [PiController; 2],
    polarity: [Polarity; 2],
}

impl LightTracker {
    pub fn new(settings: LightSettings) -> Self {
        Self {
            channels: std::array::from_fn(|_| SignalFilter::new(settings.window)),
            controllers: settings.gains.map(PiController::new),
            polarity: settings.polarity,
        }
    }

    /// Smoothed `[ldr1 - ldr2, ldr3 - ldr4]` after taking `frame` in.
    fn differentials(&mut self, frame: &LdrFrame) -> [f64; 2] {
        for (filter, value) in self.channels.iter_mut().zip(frame.values) {
            filter.push(value as f64);
        }
        let [a, b, c, d] = self.channels.each_ref().map(SignalFilter::value);
        [a - b, c - d]
    }

    /// One control tick: a command for each axis, horizon first.
    pub fn process(&mut self, frame: &LdrFrame) -> [MotionCommand; 2] {
        let errors = self.differentials(frame);
        std::array::from_fn(|i| {
            let output = self.controllers[i].update(errors[i]);
            let axis = AxisId::ALL[i];
            let command = self.polarity[i].command(axis, output);
            tracing::trace!(
                "{} error {:.1} -> output {:.2} -> {} steps {}",
                axis,
                errors[i],
                output,
                command.steps,
                command.direction
            );
            command
        })
    }

    pub fn controller(&self, axis: AxisId) -> &PiController {
        &self.controllers[axis.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Direction;

    fn frame(values: [i32; 4]) -> LdrFrame {
        LdrFrame { values }
    }

    fn unit_tracker(window: usize) -> LightTracker {
        LightTracker::new(LightSettings {
            window,
            gains: [PiGains {
                kp: 1.0,
                ki: 0.0,
                max_step: 100.0,
            }; 2],
            polarity: [Polarity::Normal; 2],
        })
    }

    #[test]
    fn test_alternating_frames_flip_direction() {
        let mut tracker = unit_tracker(1);
        let first = tracker.process(&frame([100, 200, 100, 200]));
        let second = tracker.process(&frame([200, 100, 200, 100]));

        for cmd in first {
            assert_eq!(cmd.direction, Direction::Clockwise);
            assert_eq!(cmd.steps, 100);
        }
        for cmd in second {
            assert_eq!(cmd.direction, Direction::CounterClockwise);
            assert_eq!(cmd.steps, 100);
        }
        assert_eq!(first[0].axis, AxisId::Horizon);
        assert_eq!(first[1].axis, AxisId::Rotation);
    }

    #[test]
    fn test_channels_are_smoothed_before_differencing() {
        let mut tracker = unit_tracker(2);
        tracker.process(&frame([100, 200, 0, 0]));
        let cmds = tracker.process(&frame([300, 200, 0, 0]));
        // (200 - 200) on the horizon pair
        assert_eq!(cmds[0].steps, 0);
        assert_eq!(cmds[1].steps, 0);
    }

    #[test]
    fn test_axes_use_their_own_controller() {
        let mut tracker = LightTracker::new(LightSettings {
            window: 1,
            gains: [
                PiGains { kp: 0.5, ki: 0.0, max_step: 10.0 },
                PiGains { kp: 1.0, ki: 0.0, max_step: 100.0 },
            ],
            polarity: [Polarity::Normal, Polarity::Inverted],
        });
        let cmds = tracker.process(&frame([0, 40, 60, 0]));
        assert_eq!(cmds[0].steps, 10);
        assert_eq!(cmds[0].direction, Direction::Clockwise);
        assert_eq!(cmds[1].steps, 60);
        assert_eq!(cmds[1].direction, Direction::Clockwise);
        assert_eq!(tracker.controller(AxisId::Rotation).state().integral, 60.0);
    }
}
