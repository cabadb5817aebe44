use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Location, LocationStatus, NewResult, ResultRow};

/// Source of job rows for one poller.
#[async_trait]
pub trait ConfigStore<J>: Send + Sync {
    /// Return every configuration row, or only the active ones.
    async fn find_many(&self, active_only: bool) -> Result<Vec<J>>;
}

/// Destination of computed values.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append_result(&self, result: NewResult) -> Result<ResultRow>;
}

/// Locations tracked by the status updater.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn list_locations(&self) -> Result<Vec<Location>>;

    async fn set_location_status(
        &self,
        id: &str,
        status: LocationStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;
}
