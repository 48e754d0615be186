//! Defines the Axum API routes and handlers.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc::Sender, oneshot};

use crate::events::EventBus;
use crate::motion::{AxisId, Direction, MotionCommand, MotionError};
use crate::web::models::{AbortRequest, MoveRequest, StartTrackingRequest};
use crate::web::mount_channel::MountRequest;

#[derive(Clone)]
pub struct AppState {
    pub mount_tx: Sender<MountRequest>,
    pub events: EventBus,
}

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn json_ok() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "result": "ok" }))).into_response()
}

fn bad_request(err: MotionError) -> Response {
    json_error(&err.to_string(), StatusCode::BAD_REQUEST)
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(mount_tx: Sender<MountRequest>, events: EventBus) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/move", post(move_handler))
        .route("/api/v1/abort", post(abort_handler))
        .route("/api/v1/zero", post(zero_handler))
        .route("/api/v1/tracking/start", post(start_tracking_handler))
        .route("/api/v1/tracking/stop", post(stop_tracking_handler))
        .route("/api/v1/events", get(events_handler))
        .with_state(AppState { mount_tx, events })
}

/// Send a request built around a fresh responder and wait for the reply.
async fn ask<T>(
    state: &AppState,
    build: impl FnOnce(oneshot::Sender<T>) -> MountRequest,
) -> Result<T, Response> {
    let (resp_tx, resp_rx) = oneshot::channel();
    if state.mount_tx.send(build(resp_tx)).await.is_err() {
        return Err(json_error("Mount task unavailable", StatusCode::SERVICE_UNAVAILABLE));
    }
    resp_rx
        .await
        .map_err(|_| json_error("Internal error", StatusCode::INTERNAL_SERVER_ERROR))
}

/// Handler to get the current status of the mount.
async fn get_status(State(state): State<AppState>) -> Response {
    match ask(&state, |respond_to| MountRequest::GetStatus { respond_to }).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(response) => response,
    }
}

/// Handler to start a motion on one axis.
async fn move_handler(State(state): State<AppState>, Json(payload): Json<MoveRequest>) -> Response {
    let direction = match payload.direction.parse::<Direction>() {
        Ok(direction) => direction,
        Err(e) => return bad_request(e),
    };
    let command = match MotionCommand::checked(payload.axis, direction, payload.steps) {
        Ok(command) => command,
        Err(e) => return bad_request(e),
    };
    match ask(&state, |respond_to| MountRequest::Move { command, respond_to }).await {
        Ok(()) => json_ok(),
        Err(response) => response,
    }
}

/// Abort the motion on one axis and wait for it to stop.
async fn abort_handler(State(state): State<AppState>, Json(payload): Json<AbortRequest>) -> Response {
    let axis = match AxisId::from_index(payload.axis) {
        Ok(axis) => axis,
        Err(e) => return bad_request(e),
    };
    match ask(&state, |respond_to| MountRequest::Abort { axis, respond_to }).await {
        Ok(()) => json_ok(),
        Err(response) => response,
    }
}

async fn zero_handler(State(state): State<AppState>) -> Response {
    match ask(&state, |respond_to| MountRequest::ReturnToZero { respond_to }).await {
        Ok(()) => json_ok(),
        Err(response) => response,
    }
}

async fn start_tracking_handler(
    State(state): State<AppState>,
    Json(payload): Json<StartTrackingRequest>,
) -> Response {
    let (survey, light) = (payload.survey, payload.light);
    match ask(&state, |respond_to| MountRequest::StartTracking { survey, light, respond_to }).await {
        Ok(Ok(())) => json_ok(),
        Ok(Err(e)) => json_error(&e, StatusCode::CONFLICT),
        Err(response) => response,
    }
}

/// Stop tracking and report the derived longitude.
async fn stop_tracking_handler(State(state): State<AppState>) -> Response {
    match ask(&state, |respond_to| MountRequest::StopTracking { respond_to }).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(response) => response,
    }
}

/// Server-sent stream of mount events.
async fn events_handler(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => tracing::warn!("Dropping unserializable event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Event subscriber lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
