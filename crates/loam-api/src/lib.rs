//! loam-api - reference sync backend
//!
//! Serves the REST JSON and legacy form-post sync contracts over an in-memory
//! last-write-wins record store.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

pub use config::AppConfig;
pub use routes::{app_router, AppState};
