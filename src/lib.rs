//! Agency hub: internal tooling back end for client, brand, SKU, meeting
//! debrief and copy-generation bookkeeping.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod debrief;
pub mod error;
pub mod google;
pub mod telemetry;

pub use config::AppConfig;
pub use error::{Error, Result};

/// Current UTC time in the storage timestamp format.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Fresh v4 identifier as a string.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
