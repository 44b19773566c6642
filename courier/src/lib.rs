//! courier library crate.
//!
//! Channel dispatch and scheduling engine: turns notifications into scheduled
//! per-channel delivery jobs, runs sender chains with fallback and retry, and
//! records the outcome of every delivery.

pub mod channels;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod integrations;
pub mod logging;
pub mod stores;
pub mod templates;
pub mod utils;

pub use config::DispatchConfig;
pub use dispatch::{DispatchServices, DispatchSummary, Dispatcher};
pub use error::{Error, Result};
