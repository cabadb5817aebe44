//! Location status auto-updater.
//!
//! Level-triggered rather than job-driven: one timer re-evaluates every
//! location on each tick. A location is ACTIVE while its topic produced a
//! payload within the freshness window and INACTIVE otherwise. A topic that
//! has been watched for less than one window keeps its stored status, so a
//! process restart never flips live locations. There is no hysteresis, so a
//! flapping device flaps its location.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::source::{PayloadTracker, TopicActivity};
use crate::store::LocationStore;
use crate::timers::{period_from_minutes, FirstTick, TimerPool};
use crate::types::{Location, LocationStatus};

/// Counts from one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub checked: usize,
    pub activated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterStatus {
    pub running: bool,
    pub interval_minutes: Option<u64>,
    pub freshness_minutes: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
    pub last_error: Option<String>,
}

/// Liveness rule: seen within `window` of `now` means ACTIVE, silent for a
/// whole observed window means INACTIVE. `None` while the topic has been
/// tracked for less than `window`.
pub fn liveness(
    activity: &TopicActivity,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Option<LocationStatus> {
    match activity.last_payload_at {
        Some(seen) if now - seen <= window => Some(LocationStatus::Active),
        _ if now - activity.tracked_since < window => None,
        _ => Some(LocationStatus::Inactive),
    }
}

#[derive(Default)]
struct UpdaterState {
    timers: TimerPool,
    interval: Option<Duration>,
    last_tick_at: Option<DateTime<Utc>>,
    last_report: Option<TickReport>,
    last_error: Option<String>,
}

pub struct LocationStatusUpdater {
    store: Arc<dyn LocationStore>,
    tracker: Arc<dyn PayloadTracker>,
    freshness: Duration,
    state: Mutex<UpdaterState>,
}

impl LocationStatusUpdater {
    pub fn new(
        store: Arc<dyn LocationStore>,
        tracker: Arc<dyn PayloadTracker>,
        freshness_minutes: u64,
    ) -> Self {
        Self {
            store,
            tracker,
            freshness: period_from_minutes(freshness_minutes),
            state: Mutex::new(UpdaterState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, UpdaterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (or restart) the recurring evaluation. The first pass runs
    /// immediately. The cadence is clamped to `1..=MAX_INTERVAL_MINUTES`.
    pub fn start(self: &Arc<Self>, interval_minutes: u64) {
        let interval = period_from_minutes(interval_minutes);
        let weak: Weak<Self> = Arc::downgrade(self);

        let mut state = self.lock_state();
        let restarted = state.timers.clear() > 0;
        state.timers.arm("location-status", interval, FirstTick::Immediately, move || {
            let weak = weak.clone();
            async move {
                if let Some(updater) = weak.upgrade() {
                    // Failures are recorded in the status by run_once.
                    let _ = updater.run_once().await;
                }
            }
        });
        state.interval = Some(interval);
        info!(interval_minutes = interval.as_secs() / 60, restarted, "location status updater started");
    }

    /// Stop the recurring evaluation. Returns false when it was not running.
    pub fn stop(&self) -> bool {
        let mut state = self.lock_state();
        let was_running = state.timers.clear() > 0;
        state.interval = None;
        if was_running {
            info!("location status updater stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        !self.lock_state().timers.is_empty()
    }

    /// Evaluate every location now.
    pub async fn run_once(&self) -> Result<TickReport> {
        let now = Utc::now();
        let locations = match self.store.list_locations().await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "listing locations failed");
                let mut state = self.lock_state();
                state.last_tick_at = Some(now);
                state.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let window = chrono::Duration::from_std(self.freshness).unwrap_or(chrono::Duration::MAX);
        let mut report = TickReport {
            checked: locations.len(),
            ..TickReport::default()
        };
        let mut last_error = None;

        for location in &locations {
            match self.evaluate(location, now, window).await {
                Ok(Some(LocationStatus::Active)) => report.activated += 1,
                Ok(Some(LocationStatus::Inactive)) => report.deactivated += 1,
                Ok(None) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(location_id = %location.id, topic = %location.topic, error = %e, "location evaluation failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let mut state = self.lock_state();
        state.last_tick_at = Some(now);
        state.last_report = Some(report);
        state.last_error = last_error;
        Ok(report)
    }

    /// Returns the new status when it changed.
    async fn evaluate(
        &self,
        location: &Location,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Option<LocationStatus>> {
        let activity = self.tracker.activity(&location.topic).await?;
        let Some(next) = liveness(&activity, now, window) else {
            return Ok(None);
        };
        if next == location.status {
            return Ok(None);
        }
        self.store
            .set_location_status(&location.id, next, now)
            .await?;
        info!(location_id = %location.id, from = %location.status, to = %next, "location status changed");
        Ok(Some(next))
    }

    pub fn status(&self) -> UpdaterStatus {
        let state = self.lock_state();
        UpdaterStatus {
            running: !state.timers.is_empty(),
            interval_minutes: state.interval.map(|d| d.as_secs() / 60),
            freshness_minutes: self.freshness.as_secs() / 60,
            last_tick_at: state.last_tick_at,
            last_report: state.last_report,
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryLocations {
        rows: Mutex<Vec<Location>>,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl LocationStore for MemoryLocations {
        async fn list_locations(&self) -> Result<Vec<Location>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn set_location_status(
            &self,
            id: &str,
            status: LocationStatus,
            _at: DateTime<Utc>,
        ) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|l| l.id == id)
                .ok_or_else(|| SchedulerError::Store(format!("no location {id}")))?;
            row.status = status;
            Ok(())
        }
    }

    /// Watching every topic since `since`.
    struct FixedTracker {
        since: DateTime<Utc>,
        seen: HashMap<String, DateTime<Utc>>,
    }

    impl Default for FixedTracker {
        fn default() -> Self {
            Self {
                since: Utc::now() - chrono::Duration::hours(1),
                seen: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl PayloadTracker for FixedTracker {
        async fn activity(&self, topic: &str) -> Result<TopicActivity> {
            if topic == "broken" {
                return Err(SchedulerError::Source("subscribe refused".into()));
            }
            Ok(TopicActivity {
                last_payload_at: self.seen.get(topic).copied(),
                tracked_since: self.since,
            })
        }
    }

    /// Starts watching a topic on first use, like a freshly started process.
    #[derive(Default)]
    struct FreshTracker {
        since: Mutex<HashMap<String, DateTime<Utc>>>,
        seen: Mutex<HashMap<String, DateTime<Utc>>>,
    }

    #[async_trait]
    impl PayloadTracker for FreshTracker {
        async fn activity(&self, topic: &str) -> Result<TopicActivity> {
            let tracked_since = *self
                .since
                .lock()
                .unwrap()
                .entry(topic.to_string())
                .or_insert_with(Utc::now);
            Ok(TopicActivity {
                last_payload_at: self.seen.lock().unwrap().get(topic).copied(),
                tracked_since,
            })
        }
    }

    fn location(id: &str, topic: &str, status: LocationStatus) -> Location {
        Location {
            id: id.to_string(),
            name: id.to_uppercase(),
            topic: topic.to_string(),
            status,
        }
    }

    #[test]
    fn liveness_window() {
        let now = Utc::now();
        let window = chrono::Duration::minutes(5);
        let watched = |since_min: i64, seen_min: Option<i64>| TopicActivity {
            last_payload_at: seen_min.map(|m| now - chrono::Duration::minutes(m)),
            tracked_since: now - chrono::Duration::minutes(since_min),
        };

        assert_eq!(liveness(&watched(60, None), now, window), Some(LocationStatus::Inactive));
        assert_eq!(liveness(&watched(60, Some(4)), now, window), Some(LocationStatus::Active));
        assert_eq!(liveness(&watched(60, Some(6)), now, window), Some(LocationStatus::Inactive));
        // Watched for less than one window: not enough evidence either way.
        assert_eq!(liveness(&watched(1, None), now, window), None);
        assert_eq!(liveness(&watched(1, Some(30)), now, window), None);
        assert_eq!(liveness(&watched(1, Some(0)), now, window), Some(LocationStatus::Active));
    }

    #[tokio::test]
    async fn stale_location_flips_to_inactive() {
        let now = Utc::now();
        let store = Arc::new(MemoryLocations::default());
        *store.rows.lock().unwrap() = vec![
            location("stale", "site/stale", LocationStatus::Active),
            location("fresh", "site/fresh", LocationStatus::Inactive),
            location("steady", "site/steady", LocationStatus::Active),
            location("never", "site/never", LocationStatus::Inactive),
            location("broken", "broken", LocationStatus::Active),
        ];
        let tracker = FixedTracker {
            since: now - chrono::Duration::hours(1),
            seen: HashMap::from([
                ("site/stale".to_string(), now - chrono::Duration::minutes(30)),
                ("site/fresh".to_string(), now - chrono::Duration::seconds(10)),
                ("site/steady".to_string(), now - chrono::Duration::minutes(1)),
            ]),
        };
        let updater = LocationStatusUpdater::new(store.clone(), Arc::new(tracker), 5);

        let report = updater.run_once().await.expect("tick");
        assert_eq!(
            report,
            TickReport {
                checked: 5,
                activated: 1,
                deactivated: 1,
                unchanged: 2,
                failed: 1
            }
        );

        let rows = store.rows.lock().unwrap().clone();
        let status_of = |id: &str| rows.iter().find(|l| l.id == id).map(|l| l.status);
        assert_eq!(status_of("stale"), Some(LocationStatus::Inactive));
        assert_eq!(status_of("fresh"), Some(LocationStatus::Active));
        assert_eq!(status_of("broken"), Some(LocationStatus::Active));

        let status = updater.status();
        assert_eq!(status.last_report, Some(report));
        assert!(status.last_error.is_some());
        assert!(!status.running);
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_now_then_every_interval_until_stopped() {
        let store = Arc::new(MemoryLocations::default());
        let updater = Arc::new(LocationStatusUpdater::new(
            store.clone(),
            Arc::new(FixedTracker::default()),
            5,
        ));

        updater.start(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
        assert!(updater.is_running());
        assert_eq!(updater.status().interval_minutes, Some(1));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.lists.load(Ordering::SeqCst), 3);

        // Restart with a new cadence: immediate pass, then every 2 minutes.
        updater.start(2);
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(store.lists.load(Ordering::SeqCst), 5);

        assert!(updater.stop());
        assert!(!updater.stop());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.lists.load(Ordering::SeqCst), 5);
        assert!(!updater.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_live_locations_active() {
        let store = Arc::new(MemoryLocations::default());
        *store.rows.lock().unwrap() = vec![
            location("live", "site/live", LocationStatus::Active),
            location("idle", "site/idle", LocationStatus::Inactive),
        ];
        let tracker = Arc::new(FreshTracker::default());
        let updater = Arc::new(LocationStatusUpdater::new(store.clone(), tracker.clone(), 5));

        updater.start(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
        assert_eq!(
            updater.status().last_report,
            Some(TickReport {
                checked: 2,
                unchanged: 2,
                ..TickReport::default()
            })
        );
        let status_of = |id: &str| {
            store
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|l| l.id == id)
                .map(|l| l.status)
        };
        assert_eq!(status_of("live"), Some(LocationStatus::Active));

        tracker
            .seen
            .lock()
            .unwrap()
            .insert("site/live".to_string(), Utc::now());
        let report = updater.run_once().await.expect("tick");
        assert_eq!(report.unchanged, 2);
        assert_eq!(status_of("live"), Some(LocationStatus::Active));
        assert_eq!(status_of("idle"), Some(LocationStatus::Inactive));
        updater.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_interval_is_clamped() {
        let updater = Arc::new(LocationStatusUpdater::new(
            Arc::new(MemoryLocations::default()),
            Arc::new(FixedTracker::default()),
            u64::MAX,
        ));
        updater.start(u64::MAX);
        let status = updater.status();
        assert!(status.running);
        assert_eq!(status.interval_minutes, Some(crate::timers::MAX_INTERVAL_MINUTES));
        assert_eq!(status.freshness_minutes, crate::timers::MAX_INTERVAL_MINUTES);
        assert!(updater.stop());
    }
}
