//! Schema resolution for the generation prompt.
//!
//! Sources in order of precedence: schema given on the request, schema
//! pinned in config, a summary file on disk, then an auto-fetched snapshot
//! built from the toolbox's introspection tools and cached for a few
//! minutes.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::warn;

use sqlpilot_core::config::{SchemaConfig, ToolboxConfig};
use sqlpilot_core::tools::ToolInvoker;
use sqlpilot_core::types::SchemaSource;

pub struct ResolvedSchema {
    pub schema: String,
    pub source: SchemaSource,
}

pub struct SchemaResolver {
    invoker: Arc<dyn ToolInvoker>,
    config: SchemaConfig,
    toolbox: ToolboxConfig,
    cache: Mutex<Option<(String, Instant)>>,
}

impl SchemaResolver {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: SchemaConfig, toolbox: ToolboxConfig) -> Self {
        Self {
            invoker,
            config,
            toolbox,
            cache: Mutex::new(None),
        }
    }

    pub async fn resolve(&self, custom: Option<&str>) -> ResolvedSchema {
        if let Some(custom) = custom.map(str::trim).filter(|s| !s.is_empty()) {
            return ResolvedSchema {
                schema: custom.to_string(),
                source: SchemaSource::Custom,
            };
        }

        let pinned = self.config.schema.trim();
        if !pinned.is_empty() {
            return ResolvedSchema {
                schema: pinned.to_string(),
                source: SchemaSource::Config,
            };
        }

        if let Some(text) = try_load_summary_file(&self.config.summary_file) {
            return ResolvedSchema {
                schema: text,
                source: SchemaSource::File,
            };
        }

        self.auto_schema().await
    }

    /// Cached auto-fetch. The cache only ever holds a non-empty snapshot,
    /// so failed fetches are retried on the next request.
    async fn auto_schema(&self) -> ResolvedSchema {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let mut cache = self.cache.lock().await;
        if let Some((schema, stamp)) = cache.as_ref() {
            if stamp.elapsed() < ttl {
                return ResolvedSchema {
                    schema: schema.clone(),
                    source: SchemaSource::Cache,
                };
            }
        }

        let fetched = self.fetch_from_toolbox().await;
        if fetched.trim().is_empty() {
            return ResolvedSchema {
                schema: String::new(),
                source: SchemaSource::None,
            };
        }
        let fetched = fetched.trim().to_string();
        *cache = Some((fetched.clone(), Instant::now()));
        ResolvedSchema {
            schema: fetched,
            source: SchemaSource::Fetched,
        }
    }

    /// Build a schema snapshot by listing tables and fetching each table's
    /// definition through the toolbox. Returns "" on any failure.
    async fn fetch_from_toolbox(&self) -> String {
        let tools = match self.invoker.list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                warn!(error = %err, "Failed to fetch schema from toolbox");
                return String::new();
            }
        };
        let tool_names: HashSet<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        if !tool_names.contains(self.toolbox.show_tables_tool.as_str()) {
            warn!(
                tool = %self.toolbox.show_tables_tool,
                "show-tables tool not available; cannot auto-fetch schema"
            );
            return String::new();
        }

        let tables_result = match self
            .invoker
            .call_tool(&self.toolbox.show_tables_tool, &Map::new())
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "Failed to fetch schema from toolbox");
                return String::new();
            }
        };
        let tables = parse_tables_from_result(&tables_result);
        if tables.is_empty() {
            warn!("show-tables did not return any tables");
            return String::new();
        }

        let mut sections = Vec::new();
        for table in tables.iter().take(self.toolbox.max_schema_tables) {
            let definition = self.fetch_table_definition(table, &tool_names).await;
            sections.push(format!("-- Table: {table}\n{definition}"));
        }
        sections.join("\n\n")
    }

    async fn fetch_table_definition(&self, table: &str, tool_names: &HashSet<&str>) -> String {
        let mut args = Map::new();
        args.insert("table".to_string(), Value::String(table.to_string()));

        if tool_names.contains(self.toolbox.show_create_tool.as_str()) {
            match self.invoker.call_tool(&self.toolbox.show_create_tool, &args).await {
                Ok(result) => {
                    let text = extract_text_from_result(&result);
                    if !text.trim().is_empty() {
                        return text.trim().to_string();
                    }
                }
                Err(err) => {
                    warn!(table, error = %err, "show-create-table failed");
                }
            }
        }

        if tool_names.contains(self.toolbox.describe_table_tool.as_str()) {
            match self.invoker.call_tool(&self.toolbox.describe_table_tool, &args).await {
                Ok(result) => {
                    let text = result
                        .get("rows")
                        .and_then(Value::as_array)
                        .map(|rows| rows_to_table(rows))
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| extract_text_from_result(&result));
                    if !text.trim().is_empty() {
                        return text.trim().to_string();
                    }
                }
                Err(err) => {
                    warn!(table, error = %err, "describe-table failed");
                }
            }
        }

        "(schema unavailable)".to_string()
    }
}

fn try_load_summary_file(path: &str) -> Option<String> {
    if path.trim().is_empty() {
        return None;
    }
    let text = fs::read_to_string(path).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Render result rows as a markdown-style table over the union of columns.
pub fn rows_to_table(rows: &[Value]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        let Some(object) = row.as_object() else { continue };
        for key in object.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    if columns.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(columns.join(" | "));
    lines.push(vec!["---"; columns.len()].join(" | "));
    for row in rows {
        let line = columns
            .iter()
            .map(|col| match row.get(col) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" | ");
        lines.push(line);
    }
    lines.join("\n")
}

/// Flatten a tool result into readable text: MCP content items, a bare
/// `text` field, or a `rows` table, falling back to pretty JSON.
pub fn extract_text_from_result(result: &Value) -> String {
    match result {
        Value::Null => return String::new(),
        Value::String(s) => return s.clone(),
        Value::Array(items) => {
            return items
                .iter()
                .map(extract_text_from_result)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
        }
        _ => {}
    }

    let mut pieces = Vec::new();
    if let Some(content) = result.get("content").and_then(Value::as_array) {
        for item in content {
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                pieces.push(text.to_string());
            }
        }
    }
    if let Some(text) = result.get("text").and_then(Value::as_str) {
        pieces.push(text.to_string());
    }
    if let Some(rows) = result.get("rows").and_then(Value::as_array) {
        if !rows.is_empty() {
            pieces.push(rows_to_table(rows));
        }
    }
    if pieces.is_empty() {
        return serde_json::to_string_pretty(result).unwrap_or_default();
    }
    pieces.join("\n").trim().to_string()
}

/// Pull table names out of a show-tables result: row values first, then
/// identifier-shaped words from the rendered text.
pub fn parse_tables_from_result(result: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    };

    if let Some(rows) = result.get("rows").and_then(Value::as_array) {
        for row in rows {
            if let Some(object) = row.as_object() {
                for value in object.values() {
                    if let Some(text) = value.as_str() {
                        push(text);
                    }
                }
            }
        }
    }

    let text = extract_text_from_result(result);
    for word in text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '`')) {
        let cleaned = word.replace('`', "");
        let cleaned = cleaned.trim();
        if is_identifier(cleaned) {
            push(cleaned);
        }
    }

    names
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
