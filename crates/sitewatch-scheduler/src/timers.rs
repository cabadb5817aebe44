use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// `tokio::time::interval` panics on a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest cadence any timer accepts: one week.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Period for a cadence in minutes, clamped to `1..=MAX_INTERVAL_MINUTES`.
pub fn period_from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.clamp(1, MAX_INTERVAL_MINUTES).saturating_mul(60))
}

/// When the first tick of a newly armed timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstTick {
    Immediately,
    AfterPeriod,
}

struct ArmedTimer {
    label: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Set of recurring timers owned by one poller.
///
/// Cancellation is observed between ticks only: clearing the pool stops
/// future ticks but lets a tick that is already running finish.
#[derive(Default)]
pub struct TimerPool {
    timers: Vec<ArmedTimer>,
}

impl TimerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a recurring timer calling `tick` every `period`.
    pub fn arm<F, Fut>(&mut self, label: impl Into<String>, period: Duration, first: FirstTick, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        let period = period.max(MIN_PERIOD);
        let start = match first {
            FirstTick::Immediately => Instant::now(),
            FirstTick::AfterPeriod => Instant::now() + period,
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tick().await;
            }
            debug!(timer = %task_label, "timer stopped");
        });

        debug!(timer = %label, period_ms = period.as_millis() as u64, "timer armed");
        self.timers.push(ArmedTimer {
            label,
            cancel,
            handle,
        });
    }

    /// Cancel every timer. Returns how many were armed.
    pub fn clear(&mut self) -> usize {
        let n = self.timers.len();
        for timer in self.timers.drain(..) {
            timer.cancel.cancel();
        }
        n
    }

    /// Number of timers whose loop is still alive.
    pub fn len(&self) -> usize {
        self.timers
            .iter()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> Vec<String> {
        self.timers.iter().map(|t| t.label.clone()).collect()
    }
}

impl Drop for TimerPool {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_tick(count: &Arc<AtomicUsize>) -> impl FnMut() -> futures_util::future::Ready<()> + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period_until_cleared() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut pool = TimerPool::new();
        pool.arm("t", Duration::from_secs(60), FirstTick::AfterPeriod, counter_tick(&count));
        assert_eq!(pool.len(), 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert_eq!(pool.clear(), 1);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut pool = TimerPool::new();
        pool.arm("t", Duration::from_secs(60), FirstTick::Immediately, counter_tick(&count));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_pool_stops_its_timers() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut pool = TimerPool::new();
            pool.arm("a", Duration::from_secs(1), FirstTick::AfterPeriod, counter_tick(&count));
            pool.arm("b", Duration::from_secs(1), FirstTick::AfterPeriod, counter_tick(&count));
            assert_eq!(pool.labels(), vec!["a".to_string(), "b".to_string()]);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn minute_cadences_are_clamped() {
        assert_eq!(period_from_minutes(0), Duration::from_secs(60));
        assert_eq!(period_from_minutes(10), Duration::from_secs(600));
        assert_eq!(
            period_from_minutes(u64::MAX),
            Duration::from_secs(MAX_INTERVAL_MINUTES * 60)
        );
    }
}
