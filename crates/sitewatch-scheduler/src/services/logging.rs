use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{minutes, missing, no_data, CycleDeps};
use crate::engine::{JobHandler, TimerLayout};
use crate::error::Result;
use crate::store::ConfigStore;
use crate::transform::{extract_number, scale};
use crate::types::{CycleOutcome, LoggingJob};

pub const SERVICE: &str = "logging";

/// Logs one scaled device value per job, each job on its own timer.
pub struct LoggingHandler {
    store: Arc<dyn ConfigStore<LoggingJob>>,
    deps: CycleDeps,
    interval: Duration,
}

impl LoggingHandler {
    pub fn new(store: Arc<dyn ConfigStore<LoggingJob>>, deps: CycleDeps, interval_minutes: u64) -> Self {
        Self {
            store,
            deps,
            interval: minutes(interval_minutes),
        }
    }
}

#[async_trait]
impl JobHandler for LoggingHandler {
    type Job = LoggingJob;

    fn service(&self) -> &'static str {
        SERVICE
    }

    fn layout(&self) -> TimerLayout {
        TimerLayout::PerJob
    }

    fn default_interval(&self) -> Duration {
        self.interval
    }

    fn interval(&self, job: &LoggingJob) -> Duration {
        job.interval_minutes
            .map(|m| minutes(u64::from(m)))
            .unwrap_or(self.interval)
    }

    async fn load_jobs(&self) -> Result<Vec<LoggingJob>> {
        self.store.find_many(true).await
    }

    async fn poll(&self, job: &LoggingJob) -> Result<CycleOutcome> {
        let Some(payload) = self.deps.fetch(&job.device_topic).await? else {
            return Ok(no_data());
        };
        let Some(raw) = extract_number(&payload, &job.value_key) else {
            return Ok(missing(&job.value_key));
        };

        let multiplier = job.multiplier.unwrap_or(1.0);
        let value = scale(raw, job.multiplier);
        self.deps
            .persist(
                SERVICE,
                &job.id,
                value,
                json!({ "raw": raw, "multiplier": multiplier }),
                job.output_topic.as_deref(),
            )
            .await
    }
}
