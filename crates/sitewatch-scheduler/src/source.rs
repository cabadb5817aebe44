use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// Where poll cycles read device payloads from and publish derived values to.
#[async_trait]
pub trait ValueSource: Send + Sync {
    /// Wait up to `wait` for the next payload on `topic`.
    ///
    /// `Ok(None)` means nothing arrived in time; the caller skips the cycle.
    async fn fetch(&self, topic: &str, wait: Duration) -> Result<Option<Value>>;

    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

/// What a [`PayloadTracker`] knows about one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicActivity {
    /// Arrival time of the newest payload, if any has been seen.
    pub last_payload_at: Option<DateTime<Utc>>,
    /// When watching the topic began. Silence before this instant was not
    /// observed.
    pub tracked_since: DateTime<Utc>,
}

/// Remembers when each topic last produced a payload.
#[async_trait]
pub trait PayloadTracker: Send + Sync {
    /// The first call for a topic starts tracking it.
    async fn activity(&self, topic: &str) -> Result<TopicActivity>;
}
