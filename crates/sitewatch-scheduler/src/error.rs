use thiserror::Error;

/// Errors that can occur within the polling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job store could not be read while (re)initialising a poller.
    #[error("Initialization failed for {service}: {reason}")]
    InitializationFailure { service: String, reason: String },

    /// One poll cycle failed; contained to that job and that tick.
    #[error("Poll cycle failed for job {job_id}: {reason}")]
    PollCycleFailure { job_id: String, reason: String },

    /// Persistent storage (config rows, result rows, locations) failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The value source (broker connection) failed.
    #[error("Value source error: {0}")]
    Source(String),

    /// A job row cannot be polled as configured.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The poller was shut down and no longer accepts work.
    #[error("Poller is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
