//! Contains the data models for API requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::motion::{AxisId, AxisState};
use crate::tracking::{LongitudeEstimate, Peak, TrackingStatus};

#[derive(Debug, Clone, Serialize)]
pub struct AxisStatus {
    pub axis: AxisId,
    pub position: i64,
    pub degrees: f64,
    pub state: AxisState,
}

/// Represents the current status of the mount.
#[derive(Debug, Clone, Serialize)]
pub struct MountStatusResponse {
    pub axes: Vec<AxisStatus>,
    pub tracking: TrackingStatus,
    pub peak: Option<Peak>,
    pub last_longitude: Option<LongitudeEstimate>,
}

/// Represents a request to move one axis.
///
/// Fields stay untyped so that bad values are rejected with a 400 instead of
/// failing deserialization.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub axis: usize,
    pub direction: String,
    pub steps: i64,
}

#[derive(Debug, Deserialize)]
pub struct AbortRequest {
    pub axis: usize,
}

#[derive(Debug, Deserialize)]
pub struct StartTrackingRequest {
    #[serde(default = "default_true")]
    pub survey: bool,
    #[serde(default)]
    pub light: bool,
}

/// Longitude result of a stopped session.
#[derive(Debug, Clone, Serialize)]
pub struct StopTrackingResponse {
    pub available: bool,
    pub longitude_deg: Option<f64>,
    pub solar_noon_utc: Option<DateTime<Utc>>,
    pub peak_angle_deg: Option<f64>,
}

impl From<Option<LongitudeEstimate>> for StopTrackingResponse {
    fn from(estimate: Option<LongitudeEstimate>) -> Self {
        Self {
            available: estimate.is_some(),
            longitude_deg: estimate.map(|e| e.longitude_deg),
            solar_noon_utc: estimate.map(|e| e.solar_noon_utc),
            peak_angle_deg: estimate.map(|e| e.peak_angle_deg),
        }
    }
}

fn default_true() -> bool {
    true
}
