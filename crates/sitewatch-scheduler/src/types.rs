use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common surface of every configuration row a poller can drive.
pub trait PollJob: Clone + Send + Sync + 'static {
    /// Primary key of the configuration row.
    fn id(&self) -> &str;
    /// Topic the job reads device payloads from.
    fn source_topic(&self) -> &str;
}

/// Periodic logging of one device value, linearly scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingJob {
    pub id: String,
    pub name: String,
    pub device_topic: String,
    /// Key inside the device payload; dot-separated for nested objects.
    pub value_key: String,
    /// Linear scale applied to the raw value. `None` means 1.
    pub multiplier: Option<f64>,
    /// Per-job cadence; falls back to the service interval when unset.
    pub interval_minutes: Option<u32>,
    /// When set, the scaled value is also published here.
    pub output_topic: Option<String>,
}

impl PollJob for LoggingJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn source_topic(&self) -> &str {
        &self.device_topic
    }
}

/// Periodic billing of a meter reading at a fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingJob {
    pub id: String,
    pub name: String,
    pub device_topic: String,
    pub value_key: String,
    /// Price per unit of the reading.
    pub rate: f64,
    pub currency: String,
    pub output_topic: Option<String>,
}

impl PollJob for BillingJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn source_topic(&self) -> &str {
        &self.device_topic
    }
}

/// Power computation for a power-analyzer device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerAnalyzerJob {
    pub id: String,
    pub name: String,
    pub device_topic: String,
    pub voltage_key: String,
    pub current_key: String,
    /// Unset means a unity power factor.
    pub power_factor_key: Option<String>,
    /// 1 (single-phase) or 3 (balanced three-phase, line-to-line voltage).
    pub phases: u8,
    pub output_topic: Option<String>,
}

impl PollJob for PowerAnalyzerJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn source_topic(&self) -> &str {
        &self.device_topic
    }
}

/// Liveness of a monitored location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for LocationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown location status: {other}")),
        }
    }
}

/// A location whose status follows the freshness of its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub status: LocationStatus,
}

/// A computed value about to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResult {
    /// Service that produced the value (`logging`, `billing`, `calculation`).
    pub service: String,
    pub job_id: String,
    pub value: f64,
    /// Service-specific fields (raw reading, rate, power factor, ...).
    pub derived: serde_json::Value,
}

/// A persisted result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub id: i64,
    pub service: String,
    pub job_id: String,
    pub value: f64,
    pub derived: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Why a cycle wrote nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The device did not publish within the wait window.
    NoData,
    /// The payload arrived but the key was absent, non-numeric or not finite.
    MissingValue { key: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoData => write!(f, "no data"),
            Self::MissingValue { key } => write!(f, "missing value for key {key}"),
        }
    }
}

/// Result of one poll cycle for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Persisted {
        #[serde(rename = "rowId")]
        row_id: i64,
        value: f64,
    },
    Skipped {
        #[serde(flatten)]
        reason: SkipReason,
    },
    Failed {
        error: String,
    },
}

/// Structured record of a finished cycle, kept per job by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub service: String,
    pub job_id: String,
    pub outcome: CycleOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Running totals of cycle outcomes since the poller was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTotals {
    pub persisted: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Read-only health summary of a poller. Counts and flags only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub service: String,
    pub initialized: bool,
    pub active_timers: usize,
    pub configs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    pub reload_pending: bool,
    /// Number of completed `initialize()` runs, successful or not.
    pub initializations: u64,
    pub last_error: Option<String>,
    pub cycles: CycleTotals,
    pub last_cycle_at: Option<DateTime<Utc>>,
}
