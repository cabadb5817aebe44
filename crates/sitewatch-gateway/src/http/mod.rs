pub mod health;
pub mod locations;
pub mod pollers;
pub mod webhooks;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use sitewatch_core::SitewatchError;

/// Error body shared by every handler: `{error, code}` with a matching status.
pub(crate) fn error_response(e: &SitewatchError) -> (StatusCode, Json<Value>) {
    let status = match e {
        SitewatchError::UnknownService { .. } => StatusCode::NOT_FOUND,
        SitewatchError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        SitewatchError::Config(_)
        | SitewatchError::InvalidRequest(_)
        | SitewatchError::Serialization(_) => StatusCode::BAD_REQUEST,
        SitewatchError::Io(_) | SitewatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string(), "code": e.code()})))
}
