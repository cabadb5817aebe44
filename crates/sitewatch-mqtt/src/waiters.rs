use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

/// A registered wait for the next payload on one topic.
pub struct Waiter {
    pub id: u64,
    pub rx: oneshot::Receiver<Value>,
    /// True when no other waiter was registered on the topic.
    pub first: bool,
}

/// Correlation map: topic → callers waiting for its next payload.
///
/// A payload is handed to every waiter registered at the time it arrives,
/// then those waiters are gone.
#[derive(Default)]
pub struct WaiterMap {
    inner: Mutex<HashMap<String, Vec<(u64, oneshot::Sender<Value>)>>>,
    next_id: AtomicU64,
}

impl WaiterMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(u64, oneshot::Sender<Value>)>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, topic: &str) -> Waiter {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut map = self.lock();
        let slot = map.entry(topic.to_string()).or_default();
        let first = slot.is_empty();
        slot.push((id, tx));
        Waiter { id, rx, first }
    }

    /// Hand `payload` to every waiter on `topic`. Returns how many received it.
    pub fn deliver(&self, topic: &str, payload: &Value) -> usize {
        let Some(waiters) = self.lock().remove(topic) else {
            return 0;
        };
        waiters
            .into_iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(_, tx)| tx.send(payload.clone()).is_ok())
            .filter(|sent| *sent)
            .count()
    }

    /// Drop waiter `id` if it is still registered. Returns true when `topic`
    /// has no waiters left.
    pub fn cancel(&self, topic: &str, id: u64) -> bool {
        let mut map = self.lock();
        let Some(slot) = map.get_mut(topic) else {
            return true;
        };
        slot.retain(|(wid, _)| *wid != id);
        if slot.is_empty() {
            map.remove(topic);
            true
        } else {
            false
        }
    }

    pub fn has_waiters(&self, topic: &str) -> bool {
        self.lock().get(topic).is_some_and(|w| !w.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn every_waiter_on_a_topic_gets_the_payload() {
        let map = WaiterMap::new();
        let a = map.register("site/a");
        let b = map.register("site/a");
        let other = map.register("site/b");
        assert!(a.first);
        assert!(!b.first);
        assert!(other.first);

        assert_eq!(map.deliver("site/a", &json!({"t": 21})), 2);
        assert_eq!(a.rx.await.unwrap(), json!({"t": 21}));
        assert_eq!(b.rx.await.unwrap(), json!({"t": 21}));

        assert!(!map.has_waiters("site/a"));
        assert!(map.has_waiters("site/b"));
    }

    #[test]
    fn payload_without_waiters_is_dropped() {
        let map = WaiterMap::new();
        assert_eq!(map.deliver("nobody/listens", &json!(1)), 0);
    }

    #[test]
    fn cancel_reports_when_the_topic_empties() {
        let map = WaiterMap::new();
        let a = map.register("site/a");
        let b = map.register("site/a");

        assert!(!map.cancel("site/a", a.id));
        assert!(map.has_waiters("site/a"));
        assert!(map.cancel("site/a", b.id));
        assert!(!map.has_waiters("site/a"));
        // Cancelling after delivery is harmless.
        assert!(map.cancel("site/a", b.id));

        let c = map.register("site/a");
        assert!(c.first);
    }

    #[test]
    fn dropped_receivers_are_not_counted() {
        let map = WaiterMap::new();
        let a = map.register("site/a");
        let _b = map.register("site/a");
        drop(a);
        assert_eq!(map.deliver("site/a", &json!("x")), 1);
    }
}
