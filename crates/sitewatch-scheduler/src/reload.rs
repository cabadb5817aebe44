//! Debounced reload coordination.
//!
//! Reload requests land in a single-slot `watch` channel. A background task
//! waits for the first request, then keeps restarting a quiet-window delay
//! for as long as new requests arrive. Once the window elapses with no new
//! request the reload callback runs exactly once. Requests that arrive while
//! the callback is running are queued and produce one more reload afterwards.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What a call to [`ReloadCoordinator::request`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadTicket {
    /// No reload was pending; a new quiet window started.
    Scheduled,
    /// A reload was already pending; its quiet window restarted.
    Coalesced,
    /// A reload is running right now; another one follows it.
    Queued,
    /// The coordinator was shut down; the request was ignored.
    ShutDown,
}

/// Request counter plus the pending flag, updated together under the
/// channel lock.
#[derive(Debug, Clone, Copy, Default)]
struct Requests {
    seq: u64,
    pending: bool,
}

pub struct ReloadCoordinator {
    label: String,
    requests: Arc<watch::Sender<Requests>>,
    running: Arc<AtomicBool>,
    closed: AtomicBool,
    task: JoinHandle<()>,
}

impl ReloadCoordinator {
    /// Spawn the debounce task. `on_reload` runs once per quiet window.
    pub fn spawn<F, Fut>(label: impl Into<String>, window: Duration, on_reload: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        let (requests, rx) = watch::channel(Requests::default());
        let requests = Arc::new(requests);
        let running = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(debounce_loop(
            label.clone(),
            window,
            Arc::clone(&requests),
            rx,
            Arc::clone(&running),
            on_reload,
        ));

        Self {
            label,
            requests,
            running,
            closed: AtomicBool::new(false),
            task,
        }
    }

    /// Ask for a reload. Never blocks and never reloads inline.
    pub fn request(&self) -> ReloadTicket {
        if self.closed.load(Ordering::Acquire) {
            return ReloadTicket::ShutDown;
        }

        let mut was_pending = false;
        self.requests.send_modify(|r| {
            was_pending = r.pending;
            r.pending = true;
            r.seq = r.seq.wrapping_add(1);
        });

        let ticket = if was_pending {
            ReloadTicket::Coalesced
        } else if self.running.load(Ordering::Acquire) {
            ReloadTicket::Queued
        } else {
            ReloadTicket::Scheduled
        };
        debug!(service = %self.label, ?ticket, "reload requested");
        ticket
    }

    /// True while a request is waiting for a reload to pick it up.
    pub fn is_pending(&self) -> bool {
        self.requests.borrow().pending
    }

    /// True while the reload callback is executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting requests and cancel any pending delay.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.task.abort();
            self.requests.send_if_modified(|r| {
                r.pending = false;
                false
            });
            info!(service = %self.label, "reload coordinator stopped");
        }
    }
}

impl Drop for ReloadCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop<F, Fut>(
    label: String,
    window: Duration,
    requests: Arc<watch::Sender<Requests>>,
    mut rx: watch::Receiver<Requests>,
    running: Arc<AtomicBool>,
    on_reload: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    // Highest request sequence a reload has already covered.
    let mut served = 0u64;
    loop {
        if rx.wait_for(|r| r.seq != served).await.is_err() {
            return;
        }

        // Quiet window: every further request restarts the delay.
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    debug!(service = %label, "reload request inside quiet window, delay restarted");
                }
                _ = tokio::time::sleep(window) => break,
            }
        }

        // From here on a new request is Queued, never Coalesced into a
        // reload that already took its snapshot.
        running.store(true, Ordering::Release);
        requests.send_if_modified(|r| {
            r.pending = false;
            served = r.seq;
            false
        });
        info!(service = %label, window_ms = window.as_millis() as u64, "quiet window elapsed, reloading");
        on_reload().await;
        running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(window: Duration) -> (ReloadCoordinator, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let coordinator = ReloadCoordinator::spawn("test", window, move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        (coordinator, count)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_reload() {
        let (coordinator, count) = counting(Duration::from_secs(5));

        assert_eq!(coordinator.request(), ReloadTicket::Scheduled);
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(coordinator.request(), ReloadTicket::Coalesced);
        }
        assert!(coordinator.is_pending());

        // Last request at t=0.8s; the window closes at t=5.8s.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_pending());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_reload_separately() {
        let (coordinator, count) = counting(Duration::from_secs(5));

        coordinator.request();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(coordinator.request(), ReloadTicket::Scheduled);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reload() {
        let (coordinator, count) = counting(Duration::from_secs(5));

        coordinator.request();
        tokio::time::sleep(Duration::from_secs(1)).await;
        coordinator.shutdown();
        assert_eq!(coordinator.request(), ReloadTicket::ShutDown);
        assert!(!coordinator.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_at_window_edge_is_counted_once() {
        let (coordinator, count) = counting(Duration::from_secs(5));

        coordinator.request();
        // Lands on the same instant the quiet window elapses.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let ticket = coordinator.request();

        tokio::time::sleep(Duration::from_secs(30)).await;
        let expected = if ticket == ReloadTicket::Coalesced { 1 } else { 2 };
        assert_eq!(count.load(Ordering::SeqCst), expected, "ticket {ticket:?}");
        assert!(!coordinator.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_reloads_again_after_the_running_one() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let coordinator = ReloadCoordinator::spawn("slow", Duration::from_secs(5), move || {
            let seen = Arc::clone(&seen);
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        coordinator.request();
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert!(coordinator.is_running());
        assert!(!coordinator.is_pending());
        assert_eq!(coordinator.request(), ReloadTicket::Queued);
        assert!(coordinator.is_pending());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!coordinator.is_pending());
        assert!(!coordinator.is_running());
    }
}
