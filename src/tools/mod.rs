//! Tool system.
//!
//! Tools are the model's interface to the outside world. Each one declares
//! its parameters, validates presence of required input, and executes on
//! behalf of one conversation. Filesystem side effects stay inside that
//! conversation's workspace.

pub mod builtin;

mod registry;
mod tool;

pub use registry::ToolRegistry;
pub use tool::{
    ParameterType, Tool, ToolContext, ToolDefinition, ToolError, ToolOutput, ToolParameter,
};
