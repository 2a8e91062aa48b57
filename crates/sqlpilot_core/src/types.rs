use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool discovered from the remote toolbox server.
///
/// Immutable snapshot per planning call; the toolbox owns the canonical
/// listing and may change it between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Token accounting reported by an LLM provider, when available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Provenance of the schema text used for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    /// Supplied inline in the request body.
    Custom,
    /// From the persisted configuration.
    Config,
    /// Loaded from the on-disk schema summary file.
    File,
    /// Freshly auto-discovered through toolbox introspection tools.
    Fetched,
    /// Served from the auto-discovery cache within its TTL.
    Cache,
    /// No schema available.
    None,
}

impl SchemaSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaSource::Custom => "custom",
            SchemaSource::Config => "config",
            SchemaSource::File => "file",
            SchemaSource::Fetched => "fetched",
            SchemaSource::Cache => "cache",
            SchemaSource::None => "none",
        }
    }
}

/// The execution path chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Tool,
    Sql,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Tool => "tool",
            Strategy::Sql => "sql",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SchemaSource::Custom).unwrap(),
            "\"custom\""
        );
        assert_eq!(
            serde_json::to_string(&SchemaSource::Fetched).unwrap(),
            "\"fetched\""
        );
    }

    #[test]
    fn test_strategy_roundtrip() {
        let s: Strategy = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(s, Strategy::Tool);
        assert_eq!(serde_json::to_string(&Strategy::Sql).unwrap(), "\"sql\"");
    }

    #[test]
    fn test_tool_definition_camel_case_schema_field() {
        let json = r#"{"name":"mysql_show_tables","inputSchema":{"type":"object"}}"#;
        let tool: ToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "mysql_show_tables");
        assert!(tool.input_schema.is_some());
        assert!(tool.description.is_none());
    }

    #[test]
    fn test_token_usage_partial_fields() {
        let usage: TokenUsage = serde_json::from_str(r#"{"prompt_tokens":12}"#).unwrap();
        assert_eq!(usage.prompt_tokens, Some(12));
        assert!(usage.total_tokens.is_none());
    }
}
