//! Configuration-change webhook: POST /webhooks/config-change.
//!
//! The dashboard calls this after it writes a job configuration table. The
//! body names the table (`{"entity": "billing_configs"}`) or `all`, and the
//! matching pollers get a debounced reload. Authentication follows
//! `SitewatchConfig::webhooks.auth_mode`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use super::error_response;
use crate::app::AppState;
use sitewatch_core::config::WebhookAuthMode;
use sitewatch_core::SitewatchError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-signature-256";

#[derive(Debug, Deserialize)]
struct ConfigChange {
    entity: String,
}

const LOGGING: &[&str] = &["logging"];
const BILLING: &[&str] = &["billing"];
const CALCULATION: &[&str] = &["calculation"];
const ALL: &[&str] = &["logging", "billing", "calculation"];

/// Services whose jobs live in `entity`.
fn services_for(entity: &str) -> Option<&'static [&'static str]> {
    match entity {
        "logging_configs" => Some(LOGGING),
        "billing_configs" => Some(BILLING),
        "power_analyzer_configs" => Some(CALCULATION),
        "all" => Some(ALL),
        _ => None,
    }
}

// ── Public handler ────────────────────────────────────────────────────────────

/// POST /webhooks/config-change
///
/// 200 with the reload ticket per service, 401 on auth failure, 400 on a bad
/// body or unknown entity, 404 when the webhook is disabled.
pub async fn config_change_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let cfg = &state.config.webhooks;

    if !cfg.enabled {
        warn!("config-change webhook received but it is disabled");
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "webhook is disabled"})),
        ));
    }

    match &cfg.auth_mode {
        WebhookAuthMode::HmacSha256 => {
            verify_hmac_sha256(&headers, &body, cfg.secret.as_deref()).map_err(auth_error)?;
        }
        WebhookAuthMode::BearerToken => {
            verify_bearer_token(&headers, cfg.secret.as_deref()).map_err(auth_error)?;
        }
        WebhookAuthMode::None => {}
    }

    let change: ConfigChange = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid config-change body");
        error_response(&SitewatchError::Serialization(e))
    })?;

    let services = services_for(&change.entity).ok_or_else(|| {
        warn!(entity = %change.entity, "unknown config entity");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unknown entity", "entity": &change.entity})),
        )
    })?;

    let mut reloads = Map::new();
    for service in services {
        if let Some(poller) = state.pollers.get(service) {
            reloads.insert(service.to_string(), json!(poller.request_reload()));
        }
    }

    info!(entity = %change.entity, reloads = reloads.len(), "config change accepted");
    Ok(Json(json!({"ok": true, "entity": change.entity, "reloads": reloads})))
}

// ── Auth helpers ──────────────────────────────────────────────────────────────

/// Verify `sha256=<hex>` in X-Signature-256 against the raw body.
fn verify_hmac_sha256(
    headers: &HeaderMap,
    body: &Bytes,
    secret: Option<&str>,
) -> Result<(), String> {
    let secret = secret.ok_or_else(|| "no HMAC secret configured".to_string())?;

    let sig_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Signature-256 header".to_string())?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Signature-256 header".to_string())?;

    let expected =
        hex::decode(sig_hex).map_err(|_| "X-Signature-256 is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}

/// Verify a static bearer token in the `Authorization: Bearer <token>` header.
fn verify_bearer_token(headers: &HeaderMap, secret: Option<&str>) -> Result<(), String> {
    let expected = secret.ok_or_else(|| "no bearer token configured".to_string())?;

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

fn auth_error(reason: String) -> (StatusCode, Json<Value>) {
    warn!(reason = %reason, "webhook authentication failed");
    error_response(&SitewatchError::AuthFailed(reason))
}
