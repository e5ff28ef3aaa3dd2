//! Agent relay: an agentic chat backend.
//!
//! Conversations are relayed to an LLM that may request tool calls. Tools run
//! inside a per-conversation workspace, either on the client's side (results
//! are submitted back) or server-side through the orchestrator.

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod tools;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
