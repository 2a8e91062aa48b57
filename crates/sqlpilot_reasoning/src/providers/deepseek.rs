//! DeepSeek chat provider (OpenAI-compatible completions endpoint).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sqlpilot_core::config::DeepseekConfig;
use sqlpilot_core::types::TokenUsage;

use crate::llm::{ChatClient, ChatOutcome};

pub struct DeepseekClient {
    api_base: String,
    api_key: String,
    default_model: String,
    http: reqwest::Client,
}

impl DeepseekClient {
    pub fn new(config: &DeepseekConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("DeepSeek API key is not configured (set DEEPSEEK_API_KEY)");
        }
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ChatClient for DeepseekClient {
    fn provider(&self) -> &str {
        "deepseek"
    }

    async fn chat(&self, system: &str, user: &str, model: Option<&str>) -> Result<ChatOutcome> {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        let request = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system.trim() },
                { "role": "user", "content": user.trim() },
            ],
            "temperature": 0,
            "stream": false,
        });

        let endpoint = format!("{}/v1/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!(
                "Deepseek API error {}: {}",
                status.as_u16(),
                error_detail(&body, status.canonical_reason().unwrap_or("unknown error"))
            );
        }

        let data: Value = serde_json::from_str(&body)
            .map_err(|_| anyhow!("Deepseek response parse error"))?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("Deepseek returned empty content"))?
            .to_string();

        let usage: Option<TokenUsage> = data
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok());
        if let Some(usage) = &usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "deepseek token usage"
            );
        }

        Ok(ChatOutcome {
            content,
            request,
            response: data,
            usage,
        })
    }
}

/// Pull the most useful message out of an error body. Non-JSON bodies
/// (HTML proxy pages, plain text) are reported as-is.
fn error_detail(body: &str, fallback: &str) -> String {
    if let Ok(data) = serde_json::from_str::<Value>(body) {
        if let Some(message) = data
            .pointer("/error/message")
            .or_else(|| data.get("error"))
            .or_else(|| data.get("detail"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_reads_json_error_message() {
        let body = r#"{"error":{"message":"Invalid API key"}}"#;
        assert_eq!(error_detail(body, "Bad Gateway"), "Invalid API key");
        assert_eq!(error_detail(r#"{"detail":"quota"}"#, "x"), "quota");
    }

    #[test]
    fn test_error_detail_keeps_non_json_body() {
        assert_eq!(
            error_detail("<html>502 Bad Gateway</html>", "Bad Gateway"),
            "<html>502 Bad Gateway</html>"
        );
        assert_eq!(error_detail("   ", "Bad Gateway"), "Bad Gateway");
    }
}
