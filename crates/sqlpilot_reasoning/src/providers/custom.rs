//! Self-hosted model provider speaking a plain `/api/generate` contract.
//!
//! The endpoint takes the combined prompt as `message` and returns the
//! completion under either `completion` or `response`.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use sqlpilot_core::config::CustomConfig;

use crate::llm::{ChatClient, ChatOutcome};

pub struct CustomClient {
    api_base: String,
    http: reqwest::Client,
}

impl CustomClient {
    pub fn new(config: &CustomConfig) -> Result<Self> {
        let base = resolve_api_base(&config.api_base)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { api_base: base, http })
    }
}

/// Bare host:port values get an http scheme prepended.
fn resolve_api_base(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/');
    if base.is_empty() {
        bail!("Custom provider apiBase is not configured");
    }
    let lowered = base.to_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        Ok(base.to_string())
    } else {
        Ok(format!("http://{base}"))
    }
}

#[async_trait]
impl ChatClient for CustomClient {
    fn provider(&self) -> &str {
        "custom"
    }

    async fn chat(&self, system: &str, user: &str, _model: Option<&str>) -> Result<ChatOutcome> {
        let system = system.trim();
        let user = user.trim();
        let message = if system.is_empty() {
            user.to_string()
        } else {
            format!("{system}\n\n{user}")
        };
        let mut request = json!({ "message": message, "prompt": user });
        if !system.is_empty() {
            request["few_shot_prefix"] = json!(system);
        }

        let endpoint = format!("{}/api/generate", self.api_base);
        let response = self.http.post(&endpoint).json(&request).send().await?;
        let status = response.status();
        let data: Value = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = data
                .pointer("/detail/0/msg")
                .or_else(|| data.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"));
            bail!("Custom API error {}: {message}", status.as_u16());
        }

        let content = data
            .get("completion")
            .or_else(|| data.get("response"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("Custom API returned empty response"))?
            .to_string();

        let usage = data
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok());

        Ok(ChatOutcome {
            content,
            request,
            response: data,
            usage,
        })
    }
}
