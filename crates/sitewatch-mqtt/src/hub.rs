use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sitewatch_core::config::MqttConfig;
use sitewatch_scheduler::{PayloadTracker, Result as SchedulerResult, TopicActivity, ValueSource};

use crate::error::Result;
use crate::waiters::WaiterMap;

/// Pause between reconnect attempts after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
/// rumqttc rejects keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Routing state shared between the hub handle and its event-loop task.
#[derive(Default)]
struct Shared {
    waiters: WaiterMap,
    /// Topics whose payload arrival times are being tracked, with the time
    /// tracking began. Kept subscribed.
    tracked: DashMap<String, DateTime<Utc>>,
    last_seen: DashMap<String, DateTime<Utc>>,
    /// Topics requested from the broker. Every subscribe or unsubscribe is
    /// decided and enqueued while holding this lock, so the broker sees them
    /// in decision order.
    routes: Mutex<HashSet<String>>,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, HashSet<String>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_publish(&self, topic: &str, payload: &[u8]) {
        self.last_seen.insert(topic.to_string(), Utc::now());
        if self.waiters.has_waiters(topic) {
            let delivered = self.waiters.deliver(topic, &decode_payload(payload));
            debug!(topic, delivered, "payload delivered");
        }
    }

    fn in_use(&self, topic: &str) -> bool {
        self.waiters.has_waiters(topic) || self.tracked.contains_key(topic)
    }
}

/// JSON payloads are parsed; anything else is delivered as a JSON string.
pub fn decode_payload(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Process-wide MQTT connection.
///
/// Build with [`MqttHub::connect`] inside a Tokio runtime; the event loop is
/// driven by a background task until [`MqttHub::shutdown`].
pub struct MqttHub {
    client: AsyncClient,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttHub {
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(
            config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity.max(1));
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&shared),
            cancel.clone(),
        ));
        info!(host = %config.host, port = config.port, client_id = %config.client_id, "mqtt hub started");

        Self {
            client,
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the event loop and disconnect from the broker.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt disconnect request failed");
        }
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("mqtt hub stopped");
    }

    pub fn tracked_topics(&self) -> usize {
        self.shared.tracked.len()
    }

    /// Topics currently requested from the broker, sorted.
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.shared.routes().iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Caller holds the routes lock.
    fn subscribe(&self, routes: &mut HashSet<String>, topic: &str) -> Result<()> {
        if !routes.contains(topic) {
            self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
            routes.insert(topic.to_string());
        }
        Ok(())
    }

    /// Caller holds the routes lock.
    fn unsubscribe_unused(&self, routes: &mut HashSet<String>, topic: &str) {
        if self.shared.in_use(topic) || !routes.remove(topic) {
            return;
        }
        if let Err(e) = self.client.try_unsubscribe(topic) {
            debug!(topic, error = %e, "unsubscribe failed");
        }
    }

    async fn wait_for(&self, topic: &str, wait: Duration) -> Result<Option<Value>> {
        let waiter = {
            let mut routes = self.shared.routes();
            let waiter = self.shared.waiters.register(topic);
            if let Err(e) = self.subscribe(&mut routes, topic) {
                self.shared.waiters.cancel(topic, waiter.id);
                return Err(e);
            }
            waiter
        };

        let received = tokio::time::timeout(wait, waiter.rx).await;
        self.release(topic, waiter.id);

        match received {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(_)) | Err(_) => {
                debug!(topic, wait_ms = wait.as_millis() as u64, "no payload before timeout");
                Ok(None)
            }
        }
    }

    fn release(&self, topic: &str, id: u64) {
        let mut routes = self.shared.routes();
        self.shared.waiters.cancel(topic, id);
        self.unsubscribe_unused(&mut routes, topic);
    }

    async fn publish_json(&self, topic: &str, payload: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, bytes)
            .await?;
        Ok(())
    }

    fn track(&self, topic: &str) -> Result<TopicActivity> {
        let mut routes = self.shared.routes();
        let existing = self.shared.tracked.get(topic).map(|since| *since);
        let tracked_since = match existing {
            Some(since) => since,
            None => {
                self.subscribe(&mut routes, topic)?;
                let now = Utc::now();
                self.shared.tracked.insert(topic.to_string(), now);
                debug!(topic, "tracking topic");
                now
            }
        };
        Ok(TopicActivity {
            last_payload_at: self.shared.last_seen.get(topic).map(|seen| *seen),
            tracked_since,
        })
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                shared.on_publish(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Clean session: the broker forgot every subscription.
                let routes = shared.routes();
                for topic in routes.iter() {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!(topic = %topic, error = %e, "resubscribe failed");
                    }
                }
                info!(resubscribed = routes.len(), "mqtt connected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt connection error; retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }
    debug!("mqtt event loop exited");
}

#[async_trait]
impl ValueSource for MqttHub {
    async fn fetch(&self, topic: &str, wait: Duration) -> SchedulerResult<Option<Value>> {
        Ok(self.wait_for(topic, wait).await?)
    }

    async fn publish(&self, topic: &str, payload: &Value) -> SchedulerResult<()> {
        Ok(self.publish_json(topic, payload).await?)
    }
}

#[async_trait]
impl PayloadTracker for MqttHub {
    async fn activity(&self, topic: &str) -> SchedulerResult<TopicActivity> {
        Ok(self.track(topic)?)
    }
}
