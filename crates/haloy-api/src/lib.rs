//! HTTP API server for the Haloy deployment manager.
//!
//! Admits deploy/rollback/stop/status operations, manages secrets, and
//! exposes the per-deployment and global log streams over SSE.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
