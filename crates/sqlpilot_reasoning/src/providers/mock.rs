//! Scripted chat client for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::llm::{ChatClient, ChatOutcome};

/// Returns queued responses in order, then repeats the last one.
/// An empty queue makes every call fail.
pub struct MockChatClient {
    provider: String,
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockChatClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            provider: "mock".to_string(),
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn chat(&self, system: &str, user: &str, model: Option<&str>) -> Result<ChatOutcome> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().unwrap();
        let content = responses
            .get(index)
            .or_else(|| responses.last())
            .ok_or_else(|| anyhow!("mock chat client has no scripted responses"))?
            .clone();
        Ok(ChatOutcome {
            content,
            request: json!({
                "model": model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }),
            response: json!({ "mock": true }),
            usage: None,
        })
    }
}
