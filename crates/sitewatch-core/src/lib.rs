//! `sitewatch-core`: configuration and shared error types for the sitewatch
//! polling daemon.

pub mod config;
pub mod error;

pub use config::SitewatchConfig;
pub use error::{Result, SitewatchError};
