//! Location status updater control.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sitewatch_scheduler::{LocationStatusUpdater, MAX_INTERVAL_MINUTES};
use std::sync::Arc;

use super::error_response;
use crate::app::AppState;
use sitewatch_core::SitewatchError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    interval_minutes: Option<u64>,
}

fn updater(state: &AppState) -> Result<&Arc<LocationStatusUpdater>, (StatusCode, Json<Value>)> {
    state.locations.as_ref().ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "location updater is disabled"})),
        )
    })
}

/// GET /api/locations/updater
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    Ok(Json(json!(updater(&state)?.status())))
}

/// POST /api/locations/updater/start: optional body `{intervalMinutes}`,
/// between 1 and [`MAX_INTERVAL_MINUTES`].
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let updater = updater(&state)?;
    let request: StartRequest = if body.is_empty() {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| error_response(&SitewatchError::Serialization(e)))?
    };
    let interval = match request.interval_minutes {
        Some(minutes) if !(1..=MAX_INTERVAL_MINUTES).contains(&minutes) => {
            return Err(error_response(&SitewatchError::InvalidRequest(format!(
                "intervalMinutes must be between 1 and {MAX_INTERVAL_MINUTES}, got {minutes}"
            ))));
        }
        Some(minutes) => minutes,
        None => state.config.scheduler.location.interval_minutes,
    };

    updater.start(interval);
    Ok(Json(json!(updater.status())))
}

/// POST /api/locations/updater/stop
pub async fn stop_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let updater = updater(&state)?;
    let stopped = updater.stop();
    Ok(Json(json!({"stopped": stopped, "status": updater.status()})))
}

/// POST /api/locations/updater/run: one evaluation now.
pub async fn run_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let updater = updater(&state)?;
    match updater.run_once().await {
        Ok(report) => Ok(Json(json!(report))),
        Err(e) => Err(error_response(&SitewatchError::Internal(e.to_string()))),
    }
}
