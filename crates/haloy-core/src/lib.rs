//! Core domain types for the Haloy deployment manager.
//!
//! This crate contains:
//! - Deployment identifiers and the monotonic id factory
//! - The injected clock abstraction
//! - Application configuration (the deploy-time snapshot)
//! - Deployment records and rollback targets
//! - Log entries published to the log broker
//! - The container label set that marks managed containers
//! - The shared error taxonomy

pub mod clock;
pub mod config;
pub mod deployment;
pub mod error;
pub mod id;
pub mod labels;
pub mod log;

pub use clock::{Clock, SystemClock};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use id::{DeploymentId, IdFactory};
pub use log::{LogEntry, LogLevel};
