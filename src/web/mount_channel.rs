//! Defines the communication channel messages between the web server and the mount task.

use tokio::sync::oneshot;

use super::models::{MountStatusResponse, StopTrackingResponse};
use crate::motion::{AxisId, MotionCommand};

/// Represents a request sent from a web handler to the task owning the mount.
///
/// Commands arrive already validated; the mount only reports failures that
/// depend on its state.
#[derive(Debug)]
pub enum MountRequest {
    /// A request to get the current status of the mount.
    GetStatus {
        /// The channel to send the response back on.
        respond_to: oneshot::Sender<MountStatusResponse>,
    },
    Move {
        command: MotionCommand,
        respond_to: oneshot::Sender<()>,
    },
    Abort {
        axis: AxisId,
        respond_to: oneshot::Sender<()>,
    },
    ReturnToZero {
        respond_to: oneshot::Sender<()>,
    },
    StartTracking {
        survey: bool,
        light: bool,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
    StopTracking {
        respond_to: oneshot::Sender<StopTrackingResponse>,
    },
}
