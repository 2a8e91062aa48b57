//! Gemini chat provider over the generateContent REST endpoint.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use sqlpilot_core::config::GeminiConfig;
use sqlpilot_core::types::TokenUsage;

use crate::llm::{ChatClient, ChatOutcome};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    api_key: String,
    default_model: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("GEMINI_API_KEY is required to use Gemini provider");
        }
        Ok(Self {
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ChatClient for GeminiClient {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, system: &str, user: &str, model: Option<&str>) -> Result<ChatOutcome> {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        let request = json!({
            "systemInstruction": { "parts": [{ "text": system.trim() }] },
            "contents": [{ "role": "user", "parts": [{ "text": user.trim() }] }],
            "generationConfig": { "temperature": 0 },
        });

        let endpoint = format!("{API_BASE}/models/{model}:generateContent");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let data: Value = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = data
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"));
            bail!("Gemini API error {}: {message}", status.as_u16());
        }

        let parts = data
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array);
        let content = parts
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| anyhow!("Gemini returned empty content"))?;

        let usage = usage_from_metadata(&data);
        Ok(ChatOutcome {
            content,
            request: json!({ "model": model, "prompt": user.trim() }),
            response: data,
            usage,
        })
    }
}

/// Token accounting from the endpoint's `usageMetadata` block.
fn usage_from_metadata(data: &Value) -> Option<TokenUsage> {
    let metadata = data.get("usageMetadata")?;
    let usage = TokenUsage {
        prompt_tokens: metadata.get("promptTokenCount").and_then(Value::as_u64),
        completion_tokens: metadata.get("candidatesTokenCount").and_then(Value::as_u64),
        total_tokens: metadata.get("totalTokenCount").and_then(Value::as_u64),
    };
    if usage.prompt_tokens.is_none()
        && usage.completion_tokens.is_none()
        && usage.total_tokens.is_none()
    {
        return None;
    }
    Some(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_mapped_from_metadata() {
        let data = json!({
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 7,
                "totalTokenCount": 19,
            }
        });
        let usage = usage_from_metadata(&data).unwrap();
        assert_eq!(usage.prompt_tokens, Some(12));
        assert_eq!(usage.completion_tokens, Some(7));
        assert_eq!(usage.total_tokens, Some(19));
    }

    #[test]
    fn test_missing_or_empty_metadata_yields_none() {
        assert!(usage_from_metadata(&json!({})).is_none());
        assert!(usage_from_metadata(&json!({ "usageMetadata": {} })).is_none());
    }
}
