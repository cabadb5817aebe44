//! `sitewatch-scheduler`: reload-aware pollers for the sitewatch dashboard.
//!
//! # Overview
//!
//! Each job-driven service (logging, billing, power calculation) is a
//! [`engine::ConfigurationPoller`] wrapping a [`engine::JobHandler`]. The
//! poller loads its active configuration rows, arms one timer per job (or a
//! single shared timer), and rebuilds that timer set whenever a debounced
//! reload fires.
//!
//! The [`location::LocationStatusUpdater`] is the odd one out: a single
//! recurring pass that marks locations ACTIVE or INACTIVE from payload
//! freshness.
//!
//! # Timer layouts
//!
//! | Service       | Layout    | Default cadence |
//! |---------------|-----------|-----------------|
//! | `logging`     | per job   | 1 min           |
//! | `billing`     | per job   | 10 min          |
//! | `calculation` | shared    | 1 min           |
//! | location      | single    | 1 min           |

pub mod engine;
pub mod error;
pub mod ledger;
pub mod location;
pub mod reload;
pub mod services;
pub mod source;
pub mod store;
pub mod timers;
pub mod transform;
pub mod types;

pub use engine::{ConfigurationPoller, JobHandler, ManagedPoller, TimerLayout};
pub use error::{Result, SchedulerError};
pub use location::{LocationStatusUpdater, TickReport, UpdaterStatus};
pub use timers::{period_from_minutes, MAX_INTERVAL_MINUTES};
pub use reload::{ReloadCoordinator, ReloadTicket};
pub use services::{BillingHandler, CalculationHandler, CycleDeps, LoggingHandler};
pub use source::{PayloadTracker, TopicActivity, ValueSource};
pub use store::{ConfigStore, LocationStore, ResultSink};
pub use types::{
    BillingJob, CycleOutcome, CycleReport, CycleTotals, Location, LocationStatus, LoggingJob,
    NewResult, PollJob, PowerAnalyzerJob, ResultRow, SkipReason, StatusSnapshot,
};
