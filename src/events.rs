// src/events.rs - Observer notifications published by the mount core
use serde::Serialize;
use tokio::sync::broadcast;

use crate::motion::AxisId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MountEvent {
    /// A motion on `axis` finished, naturally or by abort.
    PositionChanged { axis: AxisId, net_steps: i64 },
    /// One survey tick's filtered angles.
    AnglesSampled {
        horizon_deg: f64,
        rotation_deg: f64,
        elapsed_s: f64,
    },
    TrackingStopped { longitude_deg: Option<f64> },
}

/// Fan-out of [`MountEvent`]s. Slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MountEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: MountEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MountEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
