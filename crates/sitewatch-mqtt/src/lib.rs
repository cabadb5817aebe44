//! `sitewatch-mqtt`: one long-lived broker connection shared by every poller.
//!
//! [`MqttHub`] implements both [`sitewatch_scheduler::ValueSource`] (wait for
//! the next payload on a topic, publish derived values) and
//! [`sitewatch_scheduler::PayloadTracker`] (last payload time per topic).
//! Waiters are correlated by exact topic; wildcard routing is not supported.

pub mod error;
pub mod hub;
pub mod waiters;

pub use error::{MqttError, Result};
pub use hub::MqttHub;
pub use waiters::WaiterMap;
