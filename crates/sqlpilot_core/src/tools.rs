use crate::types::ToolDefinition;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Seam between the pipeline and the remote toolbox.
///
/// The production implementation lives in `sqlpilot_mcp`; tests substitute
/// doubles with scripted outcomes and call counters.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Discover the tools currently exposed by the toolbox server.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Invoke a tool by name. The returned value is the opaque execution
    /// result; transport and protocol failures surface as errors.
    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value>;
}

/// Trim surrounding whitespace from string-valued arguments before dispatch.
/// Non-string values pass through unchanged.
pub fn normalize_args(args: &Map<String, Value>) -> Map<String, Value> {
    args.iter()
        .map(|(key, value)| {
            let cleaned = match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other.clone(),
            };
            (key.clone(), cleaned)
        })
        .collect()
}
