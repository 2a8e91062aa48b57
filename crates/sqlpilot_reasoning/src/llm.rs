use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlpilot_core::types::TokenUsage;

/// One chat completion: the model's text plus the raw request/response pair
/// kept verbatim for debug blocks and training logs.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub request: Value,
    pub response: Value,
    pub usage: Option<TokenUsage>,
}

/// The minimal provider contract: send system + user text, receive text.
///
/// HTTP/protocol failures surface as errors carrying status and body detail;
/// callers decide whether that means degradation or request failure.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Provider label used in response envelopes and error messages.
    fn provider(&self) -> &str;

    async fn chat(&self, system: &str, user: &str, model: Option<&str>) -> Result<ChatOutcome>;
}
