//! Agent monitor library
//!
//! Aggregates task status from coding-agent providers and a fleet of worker
//! devices into one registry, and raises a notification for every task that
//! completes.

pub mod app;
pub mod error;
pub mod event;
pub mod monitor;
pub mod state;
pub mod ui;

pub use error::{ConfigurationError, ProviderError, RecordParseError};
pub use monitor::{Monitor, MonitorConfig};
