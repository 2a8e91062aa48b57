//! Raw-SQL generation: one chat round-trip plus extraction.

use anyhow::{bail, Result};
use serde_json::Value;

use sqlpilot_core::types::TokenUsage;

use crate::extractor::extract_sql;
use crate::llm::ChatClient;

#[derive(Debug)]
pub struct SqlGeneration {
    pub sql: String,
    pub raw_content: String,
    pub request: Value,
    pub response: Value,
    pub usage: Option<TokenUsage>,
}

/// Prefix the user request with the schema when one is available.
pub fn build_user_message(user_prompt: &str, schema: &str) -> String {
    let schema = schema.trim();
    if schema.is_empty() {
        user_prompt.trim().to_string()
    } else {
        format!("Database schema:\n{schema}\n\nUser request:\n{}", user_prompt.trim())
    }
}

/// Ask the model for SQL and extract a statement from its answer.
/// An answer with no recognizable SQL is an error.
pub async fn generate_sql(
    chat: &dyn ChatClient,
    system_prompt: &str,
    user_prompt: &str,
    schema: &str,
    model: Option<&str>,
) -> Result<SqlGeneration> {
    let message = build_user_message(user_prompt, schema);
    let outcome = chat.chat(system_prompt, &message, model).await?;

    let sql = extract_sql(&outcome.content);
    if sql.is_empty() {
        bail!("{} response did not include SQL", provider_label(chat.provider()));
    }

    Ok(SqlGeneration {
        sql,
        raw_content: outcome.content,
        request: outcome.request,
        response: outcome.response,
        usage: outcome.usage,
    })
}

fn provider_label(provider: &str) -> String {
    let mut chars = provider.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Model".to_string(),
    }
}
