use thiserror::Error;

#[derive(Debug, Error)]
pub enum SitewatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown service: {name}")]
    UnknownService { name: String },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SitewatchError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SitewatchError::Config(_) => "CONFIG_ERROR",
            SitewatchError::UnknownService { .. } => "UNKNOWN_SERVICE",
            SitewatchError::AuthFailed(_) => "AUTH_FAILED",
            SitewatchError::InvalidRequest(_) => "INVALID_REQUEST",
            SitewatchError::Serialization(_) => "SERIALIZATION_ERROR",
            SitewatchError::Io(_) => "IO_ERROR",
            SitewatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SitewatchError>;
