use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{minutes, missing, no_data, CycleDeps};
use crate::engine::{JobHandler, TimerLayout};
use crate::error::{Result, SchedulerError};
use crate::store::ConfigStore;
use crate::transform::{extract_number, power};
use crate::types::{CycleOutcome, PowerAnalyzerJob};

pub const SERVICE: &str = "calculation";

/// Computes power for every power-analyzer job on one shared timer.
pub struct CalculationHandler {
    store: Arc<dyn ConfigStore<PowerAnalyzerJob>>,
    deps: CycleDeps,
    interval: Duration,
}

impl CalculationHandler {
    pub fn new(
        store: Arc<dyn ConfigStore<PowerAnalyzerJob>>,
        deps: CycleDeps,
        interval_minutes: u64,
    ) -> Self {
        Self {
            store,
            deps,
            interval: minutes(interval_minutes),
        }
    }
}

#[async_trait]
impl JobHandler for CalculationHandler {
    type Job = PowerAnalyzerJob;

    fn service(&self) -> &'static str {
        SERVICE
    }

    fn layout(&self) -> TimerLayout {
        TimerLayout::Shared
    }

    fn default_interval(&self) -> Duration {
        self.interval
    }

    async fn load_jobs(&self) -> Result<Vec<PowerAnalyzerJob>> {
        self.store.find_many(true).await
    }

    async fn poll(&self, job: &PowerAnalyzerJob) -> Result<CycleOutcome> {
        if job.phases != 1 && job.phases != 3 {
            return Err(SchedulerError::InvalidJob(format!(
                "power analyzer {} has {} phases; expected 1 or 3",
                job.id, job.phases
            )));
        }

        let Some(payload) = self.deps.fetch(&job.device_topic).await? else {
            return Ok(no_data());
        };
        let Some(voltage) = extract_number(&payload, &job.voltage_key) else {
            return Ok(missing(&job.voltage_key));
        };
        let Some(current) = extract_number(&payload, &job.current_key) else {
            return Ok(missing(&job.current_key));
        };
        let power_factor = match job.power_factor_key.as_deref() {
            None => None,
            Some(key) => match extract_number(&payload, key) {
                Some(pf) => Some(pf),
                None => return Ok(missing(key)),
            },
        };

        let reading = power(voltage, current, power_factor, job.phases);
        self.deps
            .persist(
                SERVICE,
                &job.id,
                reading.real_kw,
                json!({
                    "voltage": voltage,
                    "current": current,
                    "powerFactor": power_factor.unwrap_or(1.0),
                    "apparentPowerKva": reading.apparent_kva,
                    "phases": job.phases,
                }),
                job.output_topic.as_deref(),
            )
            .await
    }
}
