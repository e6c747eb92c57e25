//! Syncwatch core library: domain types, settings and the connection config.
//!
//! Public API surface:
//! - [`types`]: newtypes and connection/table records
//! - [`error`]: [`ConfigError`]
//! - [`config`]: environment settings and the monitored-connections loader

pub mod config;
pub mod error;
pub mod types;

pub use config::{DbSettings, JobApiSettings, Settings, TableDefaults};
pub use error::ConfigError;
pub use types::{ConnectionConfig, ConnectionId, JobHandle, MonitoredTable};
