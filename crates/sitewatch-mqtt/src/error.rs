use sitewatch_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MqttError>;

impl From<MqttError> for SchedulerError {
    fn from(e: MqttError) -> Self {
        SchedulerError::Source(e.to_string())
    }
}
