//! The job-driven pollers: logging, billing and power calculation.

pub mod billing;
pub mod calculation;
pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::Result;
use crate::source::ValueSource;
use crate::store::ResultSink;
use crate::types::{CycleOutcome, NewResult, SkipReason};

pub use billing::BillingHandler;
pub use calculation::CalculationHandler;
pub use logging::LoggingHandler;

/// Collaborators every poll cycle needs.
#[derive(Clone)]
pub struct CycleDeps {
    pub source: Arc<dyn ValueSource>,
    pub sink: Arc<dyn ResultSink>,
    /// Upper bound on the wait for a device payload.
    pub value_timeout: Duration,
}

impl CycleDeps {
    /// Wait for the next payload on `topic`; `None` means skip with no data.
    async fn fetch(&self, topic: &str) -> Result<Option<Value>> {
        self.source.fetch(topic, self.value_timeout).await
    }

    /// Persist one computed value and publish it when the job asks for it.
    ///
    /// A failed publish is logged only; the persisted row stands.
    async fn persist(
        &self,
        service: &str,
        job_id: &str,
        value: f64,
        derived: Value,
        output_topic: Option<&str>,
    ) -> Result<CycleOutcome> {
        let row = self
            .sink
            .append_result(NewResult {
                service: service.to_string(),
                job_id: job_id.to_string(),
                value,
                derived: derived.clone(),
            })
            .await?;

        if let Some(topic) = output_topic {
            let mut message = json!({
                "jobId": job_id,
                "value": value,
                "timestamp": Utc::now().to_rfc3339(),
            });
            if let (Some(dst), Value::Object(extra)) = (message.as_object_mut(), derived) {
                for (k, v) in extra {
                    dst.entry(k).or_insert(v);
                }
            }
            if let Err(e) = self.source.publish(topic, &message).await {
                warn!(service, job_id, topic, error = %e, "publishing derived value failed");
            }
        }

        Ok(CycleOutcome::Persisted { row_id: row.id, value })
    }
}

fn no_data() -> CycleOutcome {
    CycleOutcome::Skipped {
        reason: SkipReason::NoData,
    }
}

fn missing(key: &str) -> CycleOutcome {
    CycleOutcome::Skipped {
        reason: SkipReason::MissingValue {
            key: key.to_string(),
        },
    }
}

fn minutes(m: u64) -> Duration {
    crate::timers::period_from_minutes(m)
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory collaborators shared by the service tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;

    use crate::error::{Result, SchedulerError};
    use crate::source::ValueSource;
    use crate::store::{ConfigStore, ResultSink};
    use crate::types::{NewResult, ResultRow};

    /// Answers `fetch` from a fixed topic → payload map; unknown topics time out.
    #[derive(Default)]
    pub struct StaticSource {
        pub payloads: Mutex<HashMap<String, Value>>,
        pub published: Mutex<Vec<(String, Value)>>,
        pub fail_publish: bool,
    }

    impl StaticSource {
        pub fn with(payloads: &[(&str, Value)]) -> Self {
            Self {
                payloads: Mutex::new(
                    payloads
                        .iter()
                        .map(|(t, v)| (t.to_string(), v.clone()))
                        .collect(),
                ),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ValueSource for StaticSource {
        async fn fetch(&self, topic: &str, wait: Duration) -> Result<Option<Value>> {
            let hit = self.payloads.lock().unwrap().get(topic).cloned();
            if hit.is_none() {
                tokio::time::sleep(wait).await;
            }
            Ok(hit)
        }

        async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
            if self.fail_publish {
                return Err(SchedulerError::Source("not connected".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemorySink {
        pub rows: Mutex<Vec<ResultRow>>,
        next_id: AtomicI64,
    }

    #[async_trait]
    impl ResultSink for MemorySink {
        async fn append_result(&self, result: NewResult) -> Result<ResultRow> {
            let row = ResultRow {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                service: result.service,
                job_id: result.job_id,
                value: result.value,
                derived: result.derived,
                recorded_at: Utc::now(),
            };
            self.rows.lock().unwrap().push(row.clone());
            Ok(row)
        }
    }

    pub struct VecStore<J>(pub Vec<J>);

    #[async_trait]
    impl<J: Clone + Send + Sync> ConfigStore<J> for VecStore<J> {
        async fn find_many(&self, _active_only: bool) -> Result<Vec<J>> {
            Ok(self.0.clone())
        }
    }
}
