use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use sitewatch_scheduler::{
    BillingJob, ConfigStore, Location, LocationStatus, LocationStore, LoggingJob, NewResult,
    PowerAnalyzerJob, ResultRow, ResultSink, Result as SchedulerResult,
};

use crate::error::{Result, StoreError};

/// The three job configuration tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTable {
    Logging,
    Billing,
    PowerAnalyzer,
}

impl ConfigTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logging => "logging_configs",
            Self::Billing => "billing_configs",
            Self::PowerAnalyzer => "power_analyzer_configs",
        }
    }
}

/// SQLite-backed job rows, locations and result log.
///
/// One connection behind a `Mutex`; every call is a short statement, so the
/// lock is never held across an await.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── job configuration ─────────────────────────────────────────────────

    pub fn upsert_logging_job(&self, job: &LoggingJob, active: bool) -> Result<()> {
        let db = self.conn()?;
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO logging_configs (id, name, device_topic, value_key, multiplier,
             interval_minutes, output_topic, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, device_topic = excluded.device_topic,
                value_key = excluded.value_key, multiplier = excluded.multiplier,
                interval_minutes = excluded.interval_minutes,
                output_topic = excluded.output_topic, active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                job.id,
                job.name,
                job.device_topic,
                job.value_key,
                job.multiplier,
                job.interval_minutes,
                job.output_topic,
                active,
                now
            ],
        )?;
        debug!(job_id = %job.id, active, "logging job saved");
        Ok(())
    }

    pub fn upsert_billing_job(&self, job: &BillingJob, active: bool) -> Result<()> {
        let db = self.conn()?;
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO billing_configs (id, name, device_topic, value_key, rate, currency,
             output_topic, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, device_topic = excluded.device_topic,
                value_key = excluded.value_key, rate = excluded.rate,
                currency = excluded.currency, output_topic = excluded.output_topic,
                active = excluded.active, updated_at = excluded.updated_at",
            params![
                job.id,
                job.name,
                job.device_topic,
                job.value_key,
                job.rate,
                job.currency,
                job.output_topic,
                active,
                now
            ],
        )?;
        debug!(job_id = %job.id, active, "billing job saved");
        Ok(())
    }

    pub fn upsert_power_analyzer_job(&self, job: &PowerAnalyzerJob, active: bool) -> Result<()> {
        let db = self.conn()?;
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO power_analyzer_configs (id, name, device_topic, voltage_key,
             current_key, power_factor_key, phases, output_topic, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, device_topic = excluded.device_topic,
                voltage_key = excluded.voltage_key, current_key = excluded.current_key,
                power_factor_key = excluded.power_factor_key, phases = excluded.phases,
                output_topic = excluded.output_topic, active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                job.id,
                job.name,
                job.device_topic,
                job.voltage_key,
                job.current_key,
                job.power_factor_key,
                job.phases,
                job.output_topic,
                active,
                now
            ],
        )?;
        debug!(job_id = %job.id, active, "power analyzer job saved");
        Ok(())
    }

    /// Flip the `active` flag of one job row. Returns false if no row matched.
    pub fn set_active(&self, table: ConfigTable, id: &str, active: bool) -> Result<bool> {
        let db = self.conn()?;
        let sql = format!(
            "UPDATE {} SET active = ?1, updated_at = ?2 WHERE id = ?3",
            table.as_str()
        );
        let changed = db.execute(&sql, params![active, Utc::now().to_rfc3339(), id])?;
        Ok(changed > 0)
    }

    pub fn logging_jobs(&self, active_only: bool) -> Result<Vec<LoggingJob>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, name, device_topic, value_key, multiplier, interval_minutes, output_topic
             FROM logging_configs WHERE (?1 = 0 OR active = 1) ORDER BY id",
        )?;
        let jobs = stmt
            .query_map(params![active_only], |row| {
                Ok(LoggingJob {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    device_topic: row.get(2)?,
                    value_key: row.get(3)?,
                    multiplier: row.get(4)?,
                    interval_minutes: row.get(5)?,
                    output_topic: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn billing_jobs(&self, active_only: bool) -> Result<Vec<BillingJob>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, name, device_topic, value_key, rate, currency, output_topic
             FROM billing_configs WHERE (?1 = 0 OR active = 1) ORDER BY id",
        )?;
        let jobs = stmt
            .query_map(params![active_only], |row| {
                Ok(BillingJob {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    device_topic: row.get(2)?,
                    value_key: row.get(3)?,
                    rate: row.get(4)?,
                    currency: row.get(5)?,
                    output_topic: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn power_analyzer_jobs(&self, active_only: bool) -> Result<Vec<PowerAnalyzerJob>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, name, device_topic, voltage_key, current_key, power_factor_key,
                    phases, output_topic
             FROM power_analyzer_configs WHERE (?1 = 0 OR active = 1) ORDER BY id",
        )?;
        let jobs = stmt
            .query_map(params![active_only], |row| {
                Ok(PowerAnalyzerJob {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    device_topic: row.get(2)?,
                    voltage_key: row.get(3)?,
                    current_key: row.get(4)?,
                    power_factor_key: row.get(5)?,
                    phases: row.get(6)?,
                    output_topic: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    // ── locations ─────────────────────────────────────────────────────────

    /// Register a new location. It starts INACTIVE until its topic reports.
    pub fn insert_location(&self, name: &str, topic: &str) -> Result<Location> {
        let location = Location {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            topic: topic.to_string(),
            status: LocationStatus::Inactive,
        };
        let db = self.conn()?;
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO locations (id, name, topic, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                location.id,
                location.name,
                location.topic,
                location.status.to_string(),
                now
            ],
        )?;
        Ok(location)
    }

    pub fn locations(&self) -> Result<Vec<Location>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id, name, topic, status FROM locations ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, name, topic, status)| {
                let status = status
                    .parse::<LocationStatus>()
                    .map_err(StoreError::InvalidRow)?;
                Ok(Location {
                    id,
                    name,
                    topic,
                    status,
                })
            })
            .collect()
    }

    pub fn update_location_status(
        &self,
        id: &str,
        status: LocationStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.conn()?;
        let at = at.to_rfc3339();
        let changed = db.execute(
            "UPDATE locations SET status = ?1, status_changed_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![status.to_string(), at, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: "location",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── results ───────────────────────────────────────────────────────────

    pub fn append(&self, result: &NewResult) -> Result<ResultRow> {
        let derived = serde_json::to_string(&result.derived)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let recorded_at = Utc::now();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO poll_results (service, job_id, value, derived, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.service,
                result.job_id,
                result.value,
                derived,
                recorded_at.to_rfc3339()
            ],
        )?;
        Ok(ResultRow {
            id: db.last_insert_rowid(),
            service: result.service.clone(),
            job_id: result.job_id.clone(),
            value: result.value,
            derived: result.derived.clone(),
            recorded_at,
        })
    }

    /// Newest rows first.
    pub fn recent_results(&self, job_id: &str, limit: usize) -> Result<Vec<ResultRow>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, service, job_id, value, derived, recorded_at
             FROM poll_results WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![job_id, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, service, job_id, value, derived, recorded_at)| {
                Ok(ResultRow {
                    id,
                    service,
                    job_id,
                    value,
                    derived: serde_json::from_str(&derived)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                    recorded_at: parse_time(&recorded_at)?,
                })
            })
            .collect()
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("bad timestamp {s:?}: {e}")))
}

#[async_trait]
impl ConfigStore<LoggingJob> for SqliteStore {
    async fn find_many(&self, active_only: bool) -> SchedulerResult<Vec<LoggingJob>> {
        Ok(self.logging_jobs(active_only)?)
    }
}

#[async_trait]
impl ConfigStore<BillingJob> for SqliteStore {
    async fn find_many(&self, active_only: bool) -> SchedulerResult<Vec<BillingJob>> {
        Ok(self.billing_jobs(active_only)?)
    }
}

#[async_trait]
impl ConfigStore<PowerAnalyzerJob> for SqliteStore {
    async fn find_many(&self, active_only: bool) -> SchedulerResult<Vec<PowerAnalyzerJob>> {
        Ok(self.power_analyzer_jobs(active_only)?)
    }
}

#[async_trait]
impl ResultSink for SqliteStore {
    async fn append_result(&self, result: NewResult) -> SchedulerResult<ResultRow> {
        Ok(self.append(&result)?)
    }
}

#[async_trait]
impl LocationStore for SqliteStore {
    async fn list_locations(&self) -> SchedulerResult<Vec<Location>> {
        Ok(self.locations()?)
    }

    async fn set_location_status(
        &self,
        id: &str,
        status: LocationStatus,
        at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        Ok(self.update_location_status(id, status, at)?)
    }
}
