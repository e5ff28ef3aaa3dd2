//! Built-in tools that come with the relay.

mod file;
mod process;
mod search;
mod shell;

pub use file::{ReadFileTool, SaveFileTool};
pub use search::{ExtractContentTool, HelperCommand, WebSearchTool};
pub use shell::{RunCommandTool, TRANSCRIPT_FILE, blocked_pattern};
