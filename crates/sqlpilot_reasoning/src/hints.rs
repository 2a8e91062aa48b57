//! Best-effort clients for the embedding hint service.
//!
//! The hint service is optional. An unconfigured base URL, a network
//! failure, or a malformed response must never fail a pipeline run; tool
//! ranking degrades to `None` and entity search to an empty list.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_suggestions: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableHint {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Response of the tool ranking endpoint. Unknown fields are kept so debug
/// payloads can expose the service's full answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRanking {
    #[serde(default)]
    pub tools: Vec<RankedTool>,
    #[serde(default)]
    pub table_hints: Vec<TableHint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct EntitySearchResponse {
    #[serde(default)]
    results: Vec<EntityHint>,
}

pub struct HintClient {
    base_url: Option<String>,
    http: reqwest::Client,
}

impl HintClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url, http }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("hint service base URL is not configured"))?;
        let url = format!("{base}{path}");
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<Value>().await {
                Ok(data) => data
                    .get("detail")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string()),
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(anyhow!("Hint service error {}: {detail}", status.as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Rank the connected toolbox's tools against the user prompt.
    /// Returns `None` when the service is unconfigured or unreachable.
    pub async fn rank_tools(
        &self,
        prompt: &str,
        limit: usize,
        schema: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Option<ToolRanking> {
        if !self.is_configured() {
            return None;
        }
        let mut payload = json!({ "prompt": prompt, "limit": limit });
        if let Some(schema) = schema.filter(|s| !s.trim().is_empty()) {
            payload["schema"] = json!(schema);
        }
        if let Some(system) = system_prompt {
            payload["system_prompt"] = json!(system);
        }
        match self.post_json("/rank/tools", &payload).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(ranking) => Some(ranking),
                Err(err) => {
                    warn!(error = %err, "tool ranking response was malformed");
                    None
                }
            },
            Err(err) => {
                warn!(error = %err, "tool ranking request failed");
                None
            }
        }
    }

    /// Search indexed entities matching the prompt, for filter suggestions.
    /// Degrades to an empty list on any failure.
    pub async fn search_entities(&self, query: &str, limit: usize) -> Vec<EntityHint> {
        if !self.is_configured() || query.trim().is_empty() {
            return Vec::new();
        }
        let payload = json!({ "prompt": query, "types": Value::Null, "limit": limit });
        match self.post_json("/entities/search", &payload).await {
            Ok(value) => serde_json::from_value::<EntitySearchResponse>(value)
                .map(|resp| resp.results)
                .unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "entity search request failed");
                Vec::new()
            }
        }
    }
}
