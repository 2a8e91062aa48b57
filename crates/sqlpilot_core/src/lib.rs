pub mod config;
pub mod tools;
pub mod types;

pub use config::SqlpilotConfig;
pub use tools::ToolInvoker;
pub use types::{SchemaSource, Strategy, TokenUsage, ToolDefinition};
