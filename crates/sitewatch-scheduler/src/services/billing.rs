use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{minutes, missing, no_data, CycleDeps};
use crate::engine::JobHandler;
use crate::error::{Result, SchedulerError};
use crate::store::ConfigStore;
use crate::transform::{bill, extract_number};
use crate::types::{BillingJob, CycleOutcome};

pub const SERVICE: &str = "billing";

/// Prices a meter reading at each job's rate on the billing cadence.
pub struct BillingHandler {
    store: Arc<dyn ConfigStore<BillingJob>>,
    deps: CycleDeps,
    interval: Duration,
}

impl BillingHandler {
    pub fn new(store: Arc<dyn ConfigStore<BillingJob>>, deps: CycleDeps, interval_minutes: u64) -> Self {
        Self {
            store,
            deps,
            interval: minutes(interval_minutes),
        }
    }
}

#[async_trait]
impl JobHandler for BillingHandler {
    type Job = BillingJob;

    fn service(&self) -> &'static str {
        SERVICE
    }

    fn default_interval(&self) -> Duration {
        self.interval
    }

    async fn load_jobs(&self) -> Result<Vec<BillingJob>> {
        self.store.find_many(true).await
    }

    async fn poll(&self, job: &BillingJob) -> Result<CycleOutcome> {
        if !job.rate.is_finite() {
            return Err(SchedulerError::InvalidJob(format!(
                "billing job {} has a non-finite rate",
                job.id
            )));
        }

        let Some(payload) = self.deps.fetch(&job.device_topic).await? else {
            return Ok(no_data());
        };
        let Some(reading) = extract_number(&payload, &job.value_key) else {
            return Ok(missing(&job.value_key));
        };

        let cost = bill(reading, job.rate);
        self.deps
            .persist(
                SERVICE,
                &job.id,
                cost,
                json!({ "reading": reading, "rate": job.rate, "currency": job.currency }),
                job.output_topic.as_deref(),
            )
            .await
    }
}
