//! Parley Common - Shared foundations for the Parley conversation backend.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types with stable caller-facing categories
//! - Logging setup and request statistics

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ObservabilityConfig, RedisConfig, StoreBackend};
pub use error::{Error, Result};
pub use logging::{init_logging, RequestOutcome, RequestStats, StatsSummary};
