// src/lib.rs - Dual-axis pointing mount: stepper control, sensor fusion and tracking
pub mod config;
pub mod control;
pub mod events;
pub mod hardware;
pub mod motion;
pub mod mount;
pub mod sensing;
pub mod time;
pub mod tracking;
pub mod web;

pub use config::{Config, ConfigError, load_config};
pub use events::{EventBus, MountEvent};
pub use motion::{AxisId, Direction, MotionCommand, MotionError, MotorController};
pub use mount::{Mount, MountError, MountHardware};
pub use tracking::{LongitudeEstimate, TrackingSession};
