//! HTTP surface for Tugboat.
//!
//! This crate exposes the daemon's jobs over a small JSON API:
//! - Status views for every registered job
//! - Ad-hoc triggering, blocking and non-blocking
//! - Recent log lines per job

mod error;
mod logs;
mod routes;

pub use error::WebError;
pub use logs::{FileLogStore, LogStore};
pub use routes::{AppState, create_router};
