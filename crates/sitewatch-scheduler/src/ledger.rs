use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::types::{CycleOutcome, CycleReport, CycleTotals};

/// Aggregates cycle reports for the status reporter.
///
/// Keeps running totals plus the newest report per job, so health routes can
/// answer without anyone reading logs.
pub struct CycleLedger {
    service: String,
    persisted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
    latest: DashMap<String, CycleReport>,
}

impl CycleLedger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            persisted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_cycle_at: Mutex::new(None),
            latest: DashMap::new(),
        }
    }

    pub fn record(&self, report: CycleReport) {
        match &report.outcome {
            CycleOutcome::Persisted { row_id, value } => {
                self.persisted.fetch_add(1, Ordering::Relaxed);
                info!(
                    service = %self.service,
                    job_id = %report.job_id,
                    row_id,
                    value,
                    elapsed_ms = report.elapsed_ms,
                    "cycle persisted"
                );
            }
            CycleOutcome::Skipped { reason } => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(service = %self.service, job_id = %report.job_id, %reason, "cycle skipped");
            }
            CycleOutcome::Failed { error } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(service = %self.service, job_id = %report.job_id, %error, "cycle failed");
            }
        }

        {
            let mut last = self
                .last_cycle_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.map_or(true, |t| t < report.started_at) {
                *last = Some(report.started_at);
            }
        }
        self.latest.insert(report.job_id.clone(), report);
    }

    pub fn totals(&self) -> CycleTotals {
        CycleTotals {
            persisted: self.persisted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_cycle_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Newest report for every job, ordered by job id.
    pub fn reports(&self) -> Vec<CycleReport> {
        let mut reports: Vec<CycleReport> =
            self.latest.iter().map(|entry| entry.value().clone()).collect();
        reports.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        reports
    }

    pub fn latest(&self, job_id: &str) -> Option<CycleReport> {
        self.latest.get(job_id).map(|r| r.value().clone())
    }

    /// Forget reports of jobs that are no longer configured.
    pub fn retain_jobs(&self, job_ids: &HashSet<&str>) {
        self.latest.retain(|id, _| job_ids.contains(id.as_str()));
    }
}
