//! Channels through which clients reach the orchestrator.

mod http;

pub use http::{ApiError, HttpChannel};
