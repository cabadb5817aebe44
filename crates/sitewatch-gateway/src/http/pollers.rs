//! Per-service poller control: `/api/{service}/reload` and `/api/{service}/jobs`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::error_response;
use crate::app::AppState;
use sitewatch_scheduler::ReloadTicket;

fn ticket_message(ticket: ReloadTicket) -> &'static str {
    match ticket {
        ReloadTicket::Scheduled => "reload scheduled",
        ReloadTicket::Coalesced => "reload already pending; quiet window restarted",
        ReloadTicket::Queued => "reload queued behind the running initialization",
        ReloadTicket::ShutDown => "poller is shut down",
    }
}

/// POST /api/{service}/reload: debounced, returns immediately.
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let poller = state.poller(&service).map_err(|e| error_response(&e))?;
    let ticket = poller.request_reload();
    info!(service = %service, ?ticket, "reload requested over http");

    Ok(Json(json!({
        "success": ticket != ReloadTicket::ShutDown,
        "message": ticket_message(ticket),
        "ticket": ticket,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// GET /api/{service}/reload: initialize if needed, then report status.
pub async fn ensure_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let poller = state.poller(&service).map_err(|e| error_response(&e))?;
    let timestamp = Utc::now().to_rfc3339();

    match poller.ensure_initialized().await {
        Ok(snapshot) => {
            let mut body = json!(snapshot);
            if let Some(obj) = body.as_object_mut() {
                obj.insert("timestamp".to_string(), json!(timestamp));
            }
            Ok(Json(body))
        }
        Err(e) => {
            warn!(service = %service, error = %e, "ensure_initialized failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "initialized": false,
                    "error": e.to_string(),
                    "timestamp": timestamp,
                })),
            ))
        }
    }
}

/// GET /api/{service}/jobs: newest cycle report per job.
pub async fn jobs_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let poller = state.poller(&service).map_err(|e| error_response(&e))?;
    Ok(Json(json!({
        "service": poller.service(),
        "jobs": poller.job_reports(),
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::app::testing::{request, send, state_with, FakePoller};
    use axum::http::StatusCode;
    use sitewatch_core::SitewatchConfig;

    #[tokio::test]
    async fn post_reload_is_fire_and_forget() {
        let logging = FakePoller::new("logging");
        let state = state_with(SitewatchConfig::default(), &[logging.clone()], None);

        let (status, body) = send(state.clone(), request("POST", "/api/logging/reload")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["ticket"], "scheduled");
        assert!(body["timestamp"].is_string());

        let (_, body) = send(state, request("POST", "/api/logging/reload")).await;
        assert_eq!(body["ticket"], "coalesced");
        assert_eq!(logging.reloads.load(Ordering::SeqCst), 2);
        assert_eq!(logging.inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_service_is_404() {
        let state = state_with(SitewatchConfig::default(), &[FakePoller::new("logging")], None);
        let (status, body) = send(state, request("POST", "/api/weather/reload")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "UNKNOWN_SERVICE");
    }

    #[tokio::test]
    async fn get_reload_initializes_once() {
        let billing = FakePoller::new("billing");
        let state = state_with(SitewatchConfig::default(), &[billing.clone()], None);

        let (status, body) = send(state.clone(), request("GET", "/api/billing/reload")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["initialized"], true);
        assert_eq!(body["activeTimers"], 2);
        assert!(body["timestamp"].is_string());

        send(state, request("GET", "/api/billing/reload")).await;
        assert_eq!(billing.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_reload_surfaces_init_failure_as_500() {
        let billing = FakePoller::new("billing");
        billing.fail_init.store(true, Ordering::SeqCst);
        let state = state_with(SitewatchConfig::default(), &[billing], None);

        let (status, body) = send(state, request("GET", "/api/billing/reload")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["initialized"], false);
        assert!(body["error"].as_str().unwrap().contains("database is locked"));
    }

    #[tokio::test]
    async fn jobs_route_returns_reports() {
        let state = state_with(SitewatchConfig::default(), &[FakePoller::new("calculation")], None);
        let (status, body) = send(state, request("GET", "/api/calculation/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "calculation");
        assert_eq!(body["jobs"], serde_json::json!([]));
    }
}
