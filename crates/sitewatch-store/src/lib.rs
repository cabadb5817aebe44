//! SQLite persistence for sitewatch: job configuration tables, locations and
//! the append-only `poll_results` log.

pub mod db;
pub mod error;
pub mod store;

pub use db::init_db;
pub use error::{Result, StoreError};
pub use store::{ConfigTable, SqliteStore};
