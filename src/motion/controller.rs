// src/motion/controller.rs - Serializes motions per axis and runs both axes concurrently
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::events::{EventBus, MountEvent};

use super::{AxisDriver, AxisId, CancelToken, Direction, MotionCommand, PositionCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisState {
    Idle,
    Moving,
}

struct ActiveMotion {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

struct AxisSlot {
    axis: AxisId,
    driver: Arc<StdMutex<AxisDriver>>,
    position: PositionCounter,
    active: Mutex<Option<ActiveMotion>>,
    state: Arc<watch::Sender<AxisState>>,
}

impl AxisSlot {
    fn new(driver: AxisDriver) -> Self {
        let (state, _) = watch::channel(AxisState::Idle);
        Self {
            axis: driver.axis(),
            position: driver.counter(),
            driver: Arc::new(StdMutex::new(driver)),
            active: Mutex::new(None),
            state: Arc::new(state),
        }
    }
}

/// Two-axis motor front: at most one motion per axis, both axes independent.
///
/// Every method takes `&self`; share the controller behind an `Arc`.
pub struct MotorController {
    slots: [AxisSlot; 2],
    events: EventBus,
    steps_per_revolution: u32,
}

impl MotorController {
    pub fn new(
        horizon: AxisDriver,
        rotation: AxisDriver,
        steps_per_revolution: u32,
        events: EventBus,
    ) -> Self {
        Self {
            slots: [AxisSlot::new(horizon), AxisSlot::new(rotation)],
            events,
            steps_per_revolution,
        }
    }

    fn slot(&self, axis: AxisId) -> &AxisSlot {
        &self.slots[axis.index()]
    }

    /// Start `command`, aborting and joining any motion already on that axis.
    ///
    /// Returns once the new motion is running; use [`Self::wait_idle`] to wait
    /// for it to finish.
    pub async fn move_axis(&self, command: MotionCommand) {
        let slot = self.slot(command.axis);
        let mut active = slot.active.lock().await;
        Self::stop_active(slot.axis, &mut active, true).await;
        self.launch(slot, &mut active, command.direction, Some(command.steps));
    }

    /// Run `axis` until aborted.
    pub async fn jog(&self, axis: AxisId, direction: Direction) {
        let slot = self.slot(axis);
        let mut active = slot.active.lock().await;
        Self::stop_active(axis, &mut active, true).await;
        self.launch(slot, &mut active, direction, None);
    }

    /// Cancel the motion on `axis` and wait until it has fully stopped.
    pub async fn abort(&self, axis: AxisId) {
        let slot = self.slot(axis);
        let mut active = slot.active.lock().await;
        Self::stop_active(axis, &mut active, false).await;
    }

    pub async fn abort_all(&self) {
        tokio::join!(self.abort(AxisId::Horizon), self.abort(AxisId::Rotation));
    }

    /// Drive both axes back to a net count of zero.
    ///
    /// Each axis is stopped first; the count is then read under the axis lock,
    /// so nothing can move the axis between the read and the return motion.
    pub async fn return_to_zero(&self) {
        for slot in &self.slots {
            let mut active = slot.active.lock().await;
            Self::stop_active(slot.axis, &mut active, false).await;
            let command = MotionCommand::toward_zero(slot.axis, slot.position.get());
            tracing::info!(
                "Returning {} to zero: {} steps {}",
                slot.axis,
                command.steps,
                command.direction
            );
            self.launch(slot, &mut active, command.direction, Some(command.steps));
        }
    }

    pub async fn wait_idle(&self, axis: AxisId) {
        let mut state = self.slot(axis).state.subscribe();
        // The sender lives as long as the controller, so this cannot fail.
        let _ = state.wait_for(|s| *s == AxisState::Idle).await;
    }

    pub async fn wait_all_idle(&self) {
        tokio::join!(self.wait_idle(AxisId::Horizon), self.wait_idle(AxisId::Rotation));
    }

    pub fn position(&self, axis: AxisId) -> i64 {
        self.slot(axis).position.get()
    }

    pub fn positions(&self) -> [i64; 2] {
        [self.position(AxisId::Horizon), self.position(AxisId::Rotation)]
    }

    pub fn degrees(&self, axis: AxisId) -> f64 {
        self.position(axis) as f64 / self.steps_per_revolution as f64 * 360.0
    }

    pub fn steps_per_revolution(&self) -> u32 {
        self.steps_per_revolution
    }

    pub fn state(&self, axis: AxisId) -> AxisState {
        *self.slot(axis).state.borrow()
    }

    /// Stop everything and deassert all pins.
    pub async fn release(&self) {
        self.abort_all().await;
        for slot in &self.slots {
            match slot.driver.lock() {
                Ok(mut driver) => driver.release(),
                Err(poisoned) => poisoned.into_inner().release(),
            }
        }
        tracing::info!("Motor pins released");
    }

    async fn stop_active(axis: AxisId, active: &mut Option<ActiveMotion>, preempting: bool) {
        let Some(motion) = active.take() else {
            return;
        };
        if preempting && !motion.handle.is_finished() {
            tracing::debug!("{} axis busy, aborting previous motion", axis);
        }
        motion.cancel.cancel();
        if let Err(e) = motion.handle.await {
            tracing::error!("{} motion task failed: {}", axis, e);
        }
    }

    fn launch(
        &self,
        slot: &AxisSlot,
        active: &mut Option<ActiveMotion>,
        direction: Direction,
        limit: Option<u64>,
    ) {
        let axis = slot.axis;
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let driver = Arc::clone(&slot.driver);
        let state = Arc::clone(&slot.state);
        let events = self.events.clone();

        match limit {
            Some(steps) => tracing::debug!("Moving {} {} steps {}", axis, steps, direction),
            None => tracing::debug!("Jogging {} {}", axis, direction),
        }
        state.send_replace(AxisState::Moving);

        let handle = tokio::task::spawn_blocking(move || {
            let report = match driver.lock() {
                Ok(mut driver) => driver.step(direction, limit, &token),
                Err(poisoned) => poisoned.into_inner().step(direction, limit, &token),
            };
            if report.aborted {
                tracing::info!(
                    "{} motion aborted after {} pulses, position {}",
                    axis,
                    report.pulses,
                    report.position
                );
            } else {
                tracing::debug!("{} motion complete, position {}", axis, report.position);
            }
            events.publish(MountEvent::PositionChanged {
                axis,
                net_steps: report.position,
            });
            state.send_replace(AxisState::Idle);
        });

        *active = Some(ActiveMotion { cancel, handle });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::PinLevel;
    use crate::hardware::sim::SimPins;
    use std::time::Duration;

    fn controller(delay: Duration) -> (MotorController, EventBus) {
        let events = EventBus::new(16);
        let horizon = AxisDriver::new(AxisId::Horizon, Box::new(SimPins::new(20, 21)), delay, PinLevel::High);
        let rotation = AxisDriver::new(AxisId::Rotation, Box::new(SimPins::new(8, 7)), delay, PinLevel::High);
        (MotorController::new(horizon, rotation, 60, events.clone()), events)
    }

    #[tokio::test]
    async fn test_move_publishes_position() {
        let (motors, events) = controller(Duration::ZERO);
        let mut rx = events.subscribe();

        motors
            .move_axis(MotionCommand::new(AxisId::Rotation, Direction::CounterClockwise, 15))
            .await;
        motors.wait_idle(AxisId::Rotation).await;

        assert_eq!(motors.positions(), [0, -15]);
        assert!((motors.degrees(AxisId::Rotation) + 90.0).abs() < 1e-9);
        assert_eq!(
            rx.recv().await.unwrap(),
            MountEvent::PositionChanged {
                axis: AxisId::Rotation,
                net_steps: -15
            }
        );
    }

    #[tokio::test]
    async fn test_abort_from_idle_is_noop() {
        let (motors, _events) = controller(Duration::ZERO);
        motors.abort(AxisId::Horizon).await;
        assert_eq!(motors.state(AxisId::Horizon), AxisState::Idle);
        assert_eq!(motors.position(AxisId::Horizon), 0);
    }

    #[tokio::test]
    async fn test_jog_runs_until_abort() {
        let (motors, _events) = controller(Duration::from_micros(200));
        motors.jog(AxisId::Horizon, Direction::Clockwise).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(motors.state(AxisId::Horizon), AxisState::Moving);

        motors.abort(AxisId::Horizon).await;
        assert_eq!(motors.state(AxisId::Horizon), AxisState::Idle);
        let stopped_at = motors.position(AxisId::Horizon);
        assert!(stopped_at > 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(motors.position(AxisId::Horizon), stopped_at);
    }

    #[tokio::test]
    async fn test_new_move_preempts_running_one() {
        let (motors, events) = controller(Duration::from_micros(200));
        let mut rx = events.subscribe();
        motors.jog(AxisId::Horizon, Direction::Clockwise).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        motors
            .move_axis(MotionCommand::new(AxisId::Horizon, Direction::Clockwise, 3))
            .await;
        motors.wait_idle(AxisId::Horizon).await;

        let Ok(MountEvent::PositionChanged { net_steps: jog_end, .. }) = rx.recv().await else {
            panic!("expected the jog's position event");
        };
        assert_eq!(motors.position(AxisId::Horizon), jog_end + 3);
    }
}
