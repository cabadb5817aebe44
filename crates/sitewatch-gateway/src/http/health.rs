use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness check plus every poller's snapshot.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pollers: Map<String, Value> = state
        .pollers
        .iter()
        .map(|(name, poller)| (name.to_string(), json!(poller.status())))
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds(),
        "pollers": pollers,
        "locationUpdater": state.locations.as_ref().map(|u| u.status()),
    }))
}
