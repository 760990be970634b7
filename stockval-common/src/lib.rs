//! Stockval Common - configuration, errors and logging shared by the stockval crates.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, MarketDataConfig, ObservabilityConfig, RefreshConfig, RefreshMode, ScheduleConfig,
    ScheduleEntry, ServerConfig, StorageConfig, ValuationConfig,
};
pub use error::Error;
pub use validation::{Validate, ValidationError, ValidationResult};

