use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use rmcp::transport::SseClientTransport;
use serde_json::{Map, Value};
use sqlpilot_core::config::ToolboxConfig;
use sqlpilot_core::tools::{normalize_args, ToolInvoker};
use sqlpilot_core::types::ToolDefinition;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Default SSE endpoint paths tried when no explicit path connects.
const DEFAULT_PATH_CANDIDATES: [&str; 4] = ["/mcp/sse", "/sse", "/mcp", "/events"];

/// An established toolbox connection. The running service must stay alive
/// for the peer handle to remain usable.
struct Connection {
    peer: Peer<RoleClient>,
    _service: RunningService<RoleClient, ()>,
}

/// Client for the remote toolbox server, reachable over SSE.
///
/// The connection is lazily established on first use and memoized for the
/// process lifetime: concurrent first callers await the same in-flight
/// attempt, and a terminal failure is cached too — no re-dial until restart.
pub struct ToolboxClient {
    config: ToolboxConfig,
    conn: OnceCell<Result<Connection, String>>,
}

impl ToolboxClient {
    pub fn new(config: ToolboxConfig) -> Self {
        Self {
            config,
            conn: OnceCell::new(),
        }
    }

    /// Get the shared peer handle, connecting on first use.
    async fn peer(&self) -> Result<Peer<RoleClient>> {
        let outcome = self.conn.get_or_init(|| self.connect_sweep()).await;
        match outcome {
            Ok(conn) => Ok(conn.peer.clone()),
            Err(message) => Err(anyhow!("{message}")),
        }
    }

    /// Try every candidate endpoint, sweeping the full list up to the
    /// configured attempt count with a fixed delay between sweeps.
    async fn connect_sweep(&self) -> Result<Connection, String> {
        if self.config.base_url.trim().is_empty() {
            return Err("Toolbox base URL is not configured (set MCP_TOOLBOX_URL)".to_string());
        }

        let candidates = candidate_urls(&self.config.base_url, self.config.sse_path.as_deref());
        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = String::from("no SSE endpoint candidates worked");

        for attempt in 1..=attempts {
            for url in &candidates {
                match self.connect_one(url).await {
                    Ok(conn) => {
                        tracing::info!("Toolbox connected via {} (attempt {})", url, attempt);
                        return Ok(conn);
                    }
                    Err(e) => {
                        tracing::debug!("Toolbox candidate {} failed: {}", url, e);
                        last_err = e.to_string();
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.connect_retry_ms)).await;
            }
        }

        Err(format!(
            "Toolbox SSE connect failed. Check MCP_TOOLBOX_URL and MCP_SSE_PATH (default /sse). \
             Error: {last_err}"
        ))
    }

    /// Attempt a single SSE handshake against one endpoint URL.
    async fn connect_one(&self, url: &str) -> Result<Connection> {
        let transport = SseClientTransport::start(url.to_string())
            .await
            .map_err(|e| anyhow!("SSE transport to {} failed: {}", url, e))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| anyhow!("MCP handshake at {} failed: {}", url, e))?;
        let peer = service.peer().clone();
        Ok(Connection {
            peer,
            _service: service,
        })
    }
}

#[async_trait]
impl ToolInvoker for ToolboxClient {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let peer = self.peer().await?;
        let tools = peer
            .list_all_tools()
            .await
            .map_err(|e| anyhow!("list_tools failed: {}", e))?;
        Ok(tools.iter().map(convert_tool).collect())
    }

    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        let peer = self.peer().await?;
        let normalized = normalize_args(args);

        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: Some(normalized),
        };

        let result = peer
            .call_tool(params)
            .await
            .map_err(|e| anyhow!("tool '{}' failed: {}", name, e))?;

        // Results flagged isError are still returned as data, matching the
        // original client; only transport/protocol failures raise.
        serde_json::to_value(&result)
            .map_err(|e| anyhow!("tool '{}' returned unserializable result: {}", name, e))
    }
}

/// Convert a discovered rmcp tool into the crate-neutral definition.
fn convert_tool(tool: &rmcp::model::Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.to_string(),
        description: tool.description.as_ref().map(|d| d.to_string()),
        input_schema: Some(Value::Object(tool.input_schema.as_ref().clone())),
    }
}

/// Build the ordered, deduplicated list of endpoint URLs to try.
///
/// Order: the base URL itself when it already carries a path, the explicitly
/// configured path, then the conventional defaults. Paths are root-relative
/// against the base origin.
pub fn candidate_urls(base_url: &str, explicit_path: Option<&str>) -> Vec<String> {
    let base = base_url.trim().trim_end_matches('/');
    let origin = origin_of(base);

    let mut candidates: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    };

    if base != origin {
        push(base.to_string());
    }
    if let Some(path) = explicit_path {
        let path = path.trim();
        if !path.is_empty() {
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            };
            push(format!("{origin}{path}"));
        }
    }
    for path in DEFAULT_PATH_CANDIDATES {
        push(format!("{origin}{path}"));
    }

    candidates
}

/// The scheme://host[:port] part of a URL, without any path.
fn origin_of(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        if let Some(slash) = rest.find('/') {
            return url[..scheme_end + 3 + slash].to_string();
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_plain_base() {
        let urls = candidate_urls("http://localhost:5000", None);
        assert_eq!(
            urls,
            vec![
                "http://localhost:5000/mcp/sse",
                "http://localhost:5000/sse",
                "http://localhost:5000/mcp",
                "http://localhost:5000/events",
            ]
        );
    }

    #[test]
    fn test_candidates_base_with_path_tried_first() {
        let urls = candidate_urls("http://host:5000/custom/sse", None);
        assert_eq!(urls[0], "http://host:5000/custom/sse");
        assert!(urls.contains(&"http://host:5000/sse".to_string()));
    }

    #[test]
    fn test_candidates_explicit_path_before_defaults() {
        let urls = candidate_urls("http://host:5000", Some("/my-sse"));
        assert_eq!(urls[0], "http://host:5000/my-sse");
        assert_eq!(urls[1], "http://host:5000/mcp/sse");
    }

    #[test]
    fn test_candidates_explicit_path_without_leading_slash() {
        let urls = candidate_urls("http://host:5000/", Some("events"));
        assert_eq!(urls[0], "http://host:5000/events");
        // Deduplicated against the default /events
        assert_eq!(urls.iter().filter(|u| u.ends_with("/events")).count(), 1);
    }

    #[test]
    fn test_candidates_trailing_slash_trimmed() {
        let urls = candidate_urls("http://host:5000/", None);
        assert_eq!(urls[0], "http://host:5000/mcp/sse");
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(origin_of("http://a:1/b/c"), "http://a:1");
        assert_eq!(origin_of("https://a"), "https://a");
    }

    #[tokio::test]
    async fn test_unconfigured_base_is_terminal() {
        let client = ToolboxClient::new(ToolboxConfig {
            base_url: String::new(),
            ..ToolboxConfig::default()
        });
        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        // Second call hits the cached failure, same message
        let err2 = client.list_tools().await.unwrap_err();
        assert_eq!(err.to_string(), err2.to_string());
    }
}
