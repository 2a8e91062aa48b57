use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SqlpilotConfig {
    pub server: ServerConfig,
    pub toolbox: ToolboxConfig,
    pub llm: LlmConfig,
    pub hints: HintsConfig,
    pub schema: SchemaConfig,
    pub training_log: TrainingLogConfig,
}

impl SqlpilotConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: SqlpilotConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env
    /// overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    /// Env names match the original backend deployment surface.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MCP_TOOLBOX_URL") {
            self.toolbox.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("MCP_SSE_PATH") {
            self.toolbox.sse_path = Some(v);
        }
        if let Ok(v) = std::env::var("DEEPSEEK_API_KEY") {
            self.llm.deepseek.api_key = v;
        }
        if let Ok(v) = std::env::var("DEEPSEEK_API_BASE") {
            self.llm.deepseek.api_base = v;
        }
        if let Ok(v) = std::env::var("DEEPSEEK_MODEL") {
            self.llm.deepseek.model = v;
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEY") {
            self.llm.gemini.api_key = v;
        }
        if let Ok(v) = std::env::var("GEMINI_MODEL") {
            self.llm.gemini.model = v;
        }
        if let Ok(v) = std::env::var("CUSTOM_API_BASE") {
            self.llm.custom.api_base = v;
        }
        if let Ok(v) = std::env::var("EMBED_LLM_URL") {
            self.hints.base_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Ok(v) = std::env::var("TRAINING_LOG_DB") {
            self.training_log.db_path = Some(v);
        }
        if let Ok(v) = std::env::var("USE_RAG_HINTS") {
            self.llm.use_rag_hints = v.eq_ignore_ascii_case("true");
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8098,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolboxConfig {
    /// Base URL of the toolbox server, e.g. "http://localhost:5000".
    pub base_url: String,
    /// Explicit SSE endpoint path; conventional defaults are tried when unset.
    pub sse_path: Option<String>,
    /// Full sweeps over all candidate paths before giving up.
    pub connect_attempts: u32,
    /// Fixed delay between sweeps, in milliseconds.
    pub connect_retry_ms: u64,
    /// The raw SQL execution tool. Never planner-selectable; it is the SQL
    /// fallback primitive.
    pub execute_tool: String,
    /// Introspection tools used for schema auto-discovery.
    pub show_tables_tool: String,
    pub show_create_tool: String,
    pub describe_table_tool: String,
    /// Cap on tables described per auto-discovery pass.
    pub max_schema_tables: usize,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            sse_path: None,
            connect_attempts: 3,
            connect_retry_ms: 1000,
            execute_tool: "mysql_execute_sql".to_string(),
            show_tables_tool: "mysql_show_tables".to_string(),
            show_create_tool: "mysql_show_create_table".to_string(),
            describe_table_tool: "mysql_describe_table".to_string(),
            max_schema_tables: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when the request does not name one.
    pub default_provider: String,
    /// System prompt for the SQL generation call.
    pub system_prompt: String,
    /// Prepend retrieved entity hints to the generation prompt.
    pub use_rag_hints: bool,
    pub deepseek: DeepseekConfig,
    pub gemini: GeminiConfig,
    pub custom: CustomConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "deepseek".to_string(),
            system_prompt: "You are an expert SQL engineer. Receive natural language questions \
                            together with the database schema and reply with a SQL statement that \
                            can be executed directly against the database. Output only the SQL \
                            statement without explanations or markdown fences. Use the schema \
                            exactly as provided."
                .to_string(),
            use_rag_hints: false,
            deepseek: DeepseekConfig::default(),
            gemini: GeminiConfig::default(),
            custom: CustomConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeepseekConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl Default for DeepseekConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-1.5-pro".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CustomConfig {
    pub api_base: String,
    /// Request timeout for the custom provider. Other providers rely on the
    /// surrounding caller for latency bounds.
    pub timeout_secs: u64,
}

impl Default for CustomConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HintsConfig {
    /// Embedding/retrieval service base URL; hints are skipped when unset.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Inline schema text; wins over file and auto-discovery when non-empty.
    pub schema: String,
    /// On-disk schema summary artifact.
    pub summary_file: String,
    /// TTL for the auto-discovery cache, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            schema: String::new(),
            summary_file: "reports/schema.summary.json".to_string(),
            cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrainingLogConfig {
    /// Sqlite database path; logging is a no-op when unset.
    pub db_path: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SqlpilotConfig::default();
        assert_eq!(cfg.server.port, 8098);
        assert_eq!(cfg.toolbox.connect_attempts, 3);
        assert_eq!(cfg.toolbox.execute_tool, "mysql_execute_sql");
        assert_eq!(cfg.llm.default_provider, "deepseek");
        assert!(cfg.hints.base_url.is_none());
        assert!(cfg.training_log.db_path.is_none());
        assert_eq!(cfg.schema.cache_ttl_secs, 300);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[toolbox]
base_url = "http://localhost:5000"
"#;
        let cfg: SqlpilotConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.toolbox.base_url, "http://localhost:5000");
        // Defaults for unspecified fields
        assert_eq!(cfg.toolbox.connect_retry_ms, 1000);
        assert_eq!(cfg.llm.deepseek.model, "deepseek-chat");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[server]
host = "127.0.0.1"
port = 9000

[toolbox]
base_url = "http://toolbox:5000"
sse_path = "/mcp/sse"
connect_attempts = 5
connect_retry_ms = 250
execute_tool = "postgres_execute_sql"
max_schema_tables = 10

[llm]
default_provider = "custom"
use_rag_hints = true

[llm.custom]
api_base = "http://llm-host:8080"
timeout_secs = 30

[hints]
base_url = "http://embed:9001"

[schema]
schema = "{\"tables\":[]}"
cache_ttl_secs = 60

[training_log]
db_path = "data/training.db"
"#;
        let cfg: SqlpilotConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.toolbox.sse_path.as_deref(), Some("/mcp/sse"));
        assert_eq!(cfg.toolbox.execute_tool, "postgres_execute_sql");
        assert_eq!(cfg.llm.default_provider, "custom");
        assert!(cfg.llm.use_rag_hints);
        assert_eq!(cfg.llm.custom.timeout_secs, 30);
        assert_eq!(cfg.hints.base_url.as_deref(), Some("http://embed:9001"));
        assert_eq!(cfg.schema.cache_ttl_secs, 60);
        assert_eq!(cfg.training_log.db_path.as_deref(), Some("data/training.db"));
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        std::env::set_var("MCP_TOOLBOX_URL", "http://other:5000/");
        std::env::set_var("DEEPSEEK_MODEL", "deepseek-reasoner");

        let mut cfg = SqlpilotConfig::default();
        cfg.apply_env_overrides();

        // Trailing slash is trimmed on the toolbox base
        assert_eq!(cfg.toolbox.base_url, "http://other:5000");
        assert_eq!(cfg.llm.deepseek.model, "deepseek-reasoner");

        std::env::remove_var("MCP_TOOLBOX_URL");
        std::env::remove_var("DEEPSEEK_MODEL");

        let cfg = SqlpilotConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.llm.default_provider, "deepseek");
    }
}
