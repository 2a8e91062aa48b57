//! Wire types for the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sqlpilot_core::types::TokenUsage;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub use_toolset: Option<bool>,
    #[serde(default)]
    pub toolset_name: Option<String>,
    #[serde(default)]
    pub use_rag_hints: Option<bool>,
}

/// The tool invocation a response reports, or the planner's stated reason
/// for skipping tools when no name is present.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerSummary {
    pub decision: String,
    pub reason: Option<String>,
    pub tool: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub prompt: String,
    pub sql: Option<String>,
    pub raw_model_output: Option<String>,
    pub execution_result: Option<Value>,
    pub schema_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub strategy: String,
    pub tool_call: Option<ToolCallInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner: Option<PlannerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner_debug: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

/// FastAPI-style validation error for a missing prompt field.
pub fn missing_prompt_detail() -> Value {
    json!({
        "detail": [{
            "loc": ["body", "prompt"],
            "msg": "field required",
            "type": "value_error.missing",
        }]
    })
}

pub fn pipeline_error_body(message: &str, debug: Option<Value>) -> Value {
    let mut body = json!({
        "error": "Pipeline failed",
        "message": message,
    });
    if let Some(debug) = debug {
        body["debug"] = debug;
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_camel_case_fields() {
        let request: GenerateRequest = serde_json::from_value(json!({
            "prompt": "list devices",
            "useToolset": true,
            "toolsetName": "mysql",
            "useRagHints": false,
        }))
        .unwrap();
        assert_eq!(request.prompt.as_deref(), Some("list devices"));
        assert_eq!(request.use_toolset, Some(true));
        assert_eq!(request.toolset_name.as_deref(), Some("mysql"));
        assert_eq!(request.use_rag_hints, Some(false));
    }

    #[test]
    fn test_missing_prompt_detail_shape() {
        let detail = missing_prompt_detail();
        assert_eq!(detail["detail"][0]["loc"][1], "prompt");
        assert_eq!(detail["detail"][0]["type"], "value_error.missing");
    }

    #[test]
    fn test_response_omits_absent_optionals() {
        let response = GenerateResponse {
            prompt: "p".into(),
            sql: Some("SELECT 1;".into()),
            raw_model_output: None,
            execution_result: None,
            schema_source: "none".into(),
            usage: None,
            provider: "deepseek".into(),
            model: None,
            strategy: "sql".into(),
            tool_call: None,
            planner: None,
            planner_debug: None,
            debug: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("usage").is_none());
        assert!(value.get("debug").is_none());
        // Null-but-present fields stay in the envelope.
        assert!(value.get("toolCall").is_some());
        assert_eq!(value["schemaSource"], "none");
    }
}
