//! Routing planner: decide between calling a toolbox tool and generating
//! raw SQL, based on a single structured LLM round-trip.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use sqlpilot_core::types::{TokenUsage, ToolDefinition};

use crate::hints::{EntityHint, HintClient, RankedTool, ToolRanking};
use crate::llm::ChatClient;
use crate::prompts::{build_planner_user_prompt, PLANNER_SYSTEM_PROMPT};

const RANKED_TOOL_LIMIT: usize = 8;
const TABLE_HINT_FALLBACK: usize = 3;
const ENTITY_HINT_LIMIT: usize = 10;
const ENTITY_PROMPT_LIMIT: usize = 5;

/// Name-based argument heuristics applied after the planner answers.
#[derive(Debug, Clone)]
pub struct ArgumentRules {
    /// Raw-execution tool excluded from planner ranking.
    pub execute_tool: String,
    pub default_limit: u64,
    pub default_offset: u64,
}

impl Default for ArgumentRules {
    fn default() -> Self {
        Self {
            execute_tool: "mysql_execute_sql".to_string(),
            default_limit: 50,
            default_offset: 0,
        }
    }
}

pub struct PlanRequest<'a> {
    pub prompt: &'a str,
    pub schema: &'a str,
    pub tools: &'a [ToolDefinition],
    pub toolset_name: Option<&'a str>,
    pub model: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Tool {
        name: String,
        arguments: Map<String, Value>,
    },
    Sql,
}

impl PlannedAction {
    pub fn decision(&self) -> &'static str {
        match self {
            PlannedAction::Tool { .. } => "tool",
            PlannedAction::Sql => "sql",
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerDebug {
    pub embedding: Option<ToolRanking>,
    pub table_names: Vec<String>,
    pub table_hints: Vec<String>,
    pub filter_hints: Vec<EntityHint>,
    pub filtered_tools: Vec<String>,
    pub planner_tools: Vec<RankedTool>,
    pub final_tool: Option<Value>,
}

pub struct PlanOutcome {
    pub action: PlannedAction,
    pub reason: String,
    pub raw_content: Option<String>,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub usage: Option<TokenUsage>,
    pub tool_definition: Option<RankedTool>,
    pub debug: PlannerDebug,
}

impl PlanOutcome {
    fn short_circuit(reason: &str) -> Self {
        Self {
            action: PlannedAction::Sql,
            reason: reason.to_string(),
            raw_content: None,
            request: None,
            response: None,
            usage: None,
            tool_definition: None,
            debug: PlannerDebug::default(),
        }
    }
}

/// Table names from a JSON schema document of shape `{"tables":[{"name":..}]}`.
/// Non-JSON schema text yields an empty list.
fn parse_schema_tables(schema_text: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<Value>(schema_text) else {
        return Vec::new();
    };
    let Some(tables) = parsed.get("tables").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for table in tables {
        let Some(name) = table.get("name").and_then(Value::as_str) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || !seen.insert(name.to_lowercase()) {
            continue;
        }
        result.push(name.to_string());
    }
    result
}

fn select_primary_table<'a>(table_hints: &'a [String], table_names: &'a [String]) -> Option<&'a str> {
    table_hints
        .iter()
        .chain(table_names.iter())
        .map(|name| name.trim())
        .find(|name| !name.is_empty())
}

/// Fill in conventional arguments the model tends to omit. Model-provided
/// values always win over suggestions and defaults.
fn apply_argument_defaults(
    rules: &ArgumentRules,
    tool_name: &str,
    mut args: Map<String, Value>,
    table_hints: &[String],
    table_names: &[String],
    suggestions: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    if let Some(suggestions) = suggestions {
        for (key, value) in suggestions {
            if !value.is_null() && !args.contains_key(key) {
                args.insert(key.clone(), value.clone());
            }
        }
    }

    let lowered = tool_name.to_lowercase();

    if let Some(primary) = select_primary_table(table_hints, table_names) {
        if lowered.contains("table") {
            for key in ["tableName", "table", "table_name"] {
                if !args.contains_key(key) {
                    args.insert(key.to_string(), Value::String(primary.to_string()));
                }
            }
        }
    }

    if lowered.contains("list") || lowered.contains("select") {
        if !args.get("limit").map_or(false, Value::is_number) {
            args.insert("limit".to_string(), Value::from(rules.default_limit));
        }
        let has_offset = args.get("offset").map_or(false, Value::is_number)
            || args.get("start").map_or(false, Value::is_number);
        if !has_offset {
            args.insert("offset".to_string(), Value::from(rules.default_offset));
        }
    }

    args
}

/// Parse planner output as JSON, salvaging the outermost object from
/// surrounding prose if direct parsing fails.
pub fn extract_json(text: &str) -> Option<Value> {
    let direct = text.trim();
    if let Ok(value) = serde_json::from_str(direct) {
        return Some(value);
    }
    let first = direct.find('{')?;
    let last = direct.rfind('}')?;
    if last <= first {
        return None;
    }
    serde_json::from_str(&direct[first..=last]).ok()
}

fn to_ranked(tool: &ToolDefinition) -> RankedTool {
    RankedTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
        argument_suggestions: None,
        score: None,
    }
}

/// Merge embedding-ranked tools with the full definitions from the toolbox.
/// Without a ranking, the first few eligible tools are offered as-is.
fn select_planner_tools(filtered: &[ToolDefinition], ranking: Option<&ToolRanking>) -> Vec<RankedTool> {
    let ranked = ranking.map(|r| r.tools.as_slice()).unwrap_or_default();
    if ranked.is_empty() {
        return filtered.iter().take(RANKED_TOOL_LIMIT).map(to_ranked).collect();
    }
    ranked
        .iter()
        .filter(|item| !item.name.is_empty())
        .map(|item| {
            let base = filtered.iter().find(|tool| tool.name == item.name);
            RankedTool {
                name: item.name.clone(),
                description: item
                    .description
                    .clone()
                    .or_else(|| base.and_then(|b| b.description.clone())),
                input_schema: item
                    .input_schema
                    .clone()
                    .or_else(|| base.and_then(|b| b.input_schema.clone())),
                argument_suggestions: item.argument_suggestions.clone(),
                score: item.score,
            }
        })
        .collect()
}

/// The planner tool from the model's JSON, tolerating string-encoded
/// objects at both the tool and arguments level.
fn parse_planner_tool(parsed: &Value) -> Option<(String, Map<String, Value>)> {
    if parsed.get("decision").and_then(Value::as_str) != Some("tool") {
        return None;
    }
    let mut tool = parsed.get("tool")?.clone();
    if let Value::String(encoded) = &tool {
        tool = serde_json::from_str(encoded).ok()?;
    }
    let name = tool.get("name")?.as_str()?.to_string();
    if name.is_empty() {
        return None;
    }
    let arguments = match tool.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) if !encoded.trim().is_empty() => {
            match serde_json::from_str::<Value>(encoded) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            }
        }
        _ => Map::new(),
    };
    Some((name, arguments))
}

/// One planning round: rank tools, gather hints, ask the model, and apply
/// argument defaults to its choice.
pub async fn plan_tool_usage(
    chat: &dyn ChatClient,
    hints: &HintClient,
    rules: &ArgumentRules,
    request: PlanRequest<'_>,
) -> Result<PlanOutcome> {
    let execute_tool = rules.execute_tool.to_lowercase();
    let filtered: Vec<ToolDefinition> = request
        .tools
        .iter()
        .filter(|tool| !tool.name.is_empty() && tool.name.to_lowercase() != execute_tool)
        .cloned()
        .collect();

    if filtered.is_empty() {
        return Ok(PlanOutcome::short_circuit("No eligible tools"));
    }

    let ranking = hints
        .rank_tools(
            request.prompt,
            RANKED_TOOL_LIMIT,
            Some(request.schema),
            Some(PLANNER_SYSTEM_PROMPT),
        )
        .await;

    let table_names = parse_schema_tables(request.schema);
    let ranked_table_hints: Vec<String> = ranking
        .as_ref()
        .map(|r| {
            r.table_hints
                .iter()
                .filter_map(|hint| hint.name.as_deref())
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let table_hints = if ranked_table_hints.is_empty() {
        table_names.iter().take(TABLE_HINT_FALLBACK).cloned().collect()
    } else {
        ranked_table_hints
    };

    let filter_hints = hints.search_entities(request.prompt, ENTITY_HINT_LIMIT).await;

    let planner_tools = select_planner_tools(&filtered, ranking.as_ref());

    let prompt_hints: Vec<EntityHint> =
        filter_hints.iter().take(ENTITY_PROMPT_LIMIT).cloned().collect();
    let user_prompt = build_planner_user_prompt(
        request.prompt,
        request.schema,
        &planner_tools,
        request.toolset_name,
        &table_hints,
        &prompt_hints,
    );

    let outcome = chat
        .chat(PLANNER_SYSTEM_PROMPT, &user_prompt, request.model)
        .await?;

    let parsed = extract_json(&outcome.content);
    let mut action = PlannedAction::Sql;
    let mut tool_definition = None;
    let mut final_tool = None;

    if let Some((name, raw_args)) = parsed.as_ref().and_then(parse_planner_tool) {
        let suggestions = planner_tools
            .iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| entry.argument_suggestions.as_ref());
        let arguments = apply_argument_defaults(
            rules,
            &name,
            raw_args,
            &table_hints,
            &table_names,
            suggestions,
        );
        tool_definition = planner_tools.iter().find(|entry| entry.name == name).cloned();
        final_tool = Some(serde_json::json!({ "name": name, "arguments": arguments }));
        action = PlannedAction::Tool { name, arguments };
    }

    let mut reason = parsed
        .as_ref()
        .and_then(|p| p.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string);
    if matches!(action, PlannedAction::Sql) && reason.is_none() {
        reason = Some("Planner did not find a confident tool match for the request".to_string());
    }

    Ok(PlanOutcome {
        action,
        reason: reason.unwrap_or_default(),
        raw_content: Some(outcome.content),
        request: Some(outcome.request),
        response: Some(outcome.response),
        usage: outcome.usage,
        tool_definition,
        debug: PlannerDebug {
            embedding: ranking,
            table_names,
            table_hints,
            filter_hints,
            filtered_tools: filtered.iter().map(|tool| tool.name.clone()).collect(),
            planner_tools,
            final_tool,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: None,
        }
    }

    #[test]
    fn test_extract_json_direct_and_salvaged() {
        assert_eq!(extract_json(r#"{"decision":"sql"}"#), Some(json!({"decision":"sql"})));
        let noisy = "Sure, here you go:\n{\"decision\": \"sql\", \"tool\": null}\nHope it helps.";
        assert_eq!(
            extract_json(noisy),
            Some(json!({"decision": "sql", "tool": null}))
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_schema_tables_dedupes_case_insensitively() {
        let schema = r#"{"tables":[{"name":"Devices"},{"name":"devices"},{"name":" users "},{"cols":1}]}"#;
        assert_eq!(parse_schema_tables(schema), vec!["Devices", "users"]);
        assert!(parse_schema_tables("CREATE TABLE t (id INT);").is_empty());
    }

    #[test]
    fn test_argument_defaults_for_list_tools() {
        let rules = ArgumentRules::default();
        let args = apply_argument_defaults(&rules, "mysql_list_rows", Map::new(), &[], &[], None);
        assert_eq!(args["limit"], json!(50));
        assert_eq!(args["offset"], json!(0));
    }

    #[test]
    fn test_model_arguments_win_over_defaults_and_suggestions() {
        let rules = ArgumentRules::default();
        let mut model_args = Map::new();
        model_args.insert("limit".into(), json!(5));
        let mut suggestions = Map::new();
        suggestions.insert("limit".into(), json!(99));
        suggestions.insert("orderBy".into(), json!("id"));
        let args = apply_argument_defaults(
            &rules,
            "mysql_select_rows",
            model_args,
            &[],
            &[],
            Some(&suggestions),
        );
        assert_eq!(args["limit"], json!(5));
        assert_eq!(args["orderBy"], json!("id"));
        assert_eq!(args["offset"], json!(0));
    }

    #[test]
    fn test_table_name_filled_from_top_hint() {
        let rules = ArgumentRules::default();
        let hints = vec!["devices".to_string()];
        let args =
            apply_argument_defaults(&rules, "mysql_describe_table", Map::new(), &hints, &[], None);
        assert_eq!(args["tableName"], json!("devices"));
        assert_eq!(args["table"], json!("devices"));
        assert_eq!(args["table_name"], json!("devices"));
    }

    #[test]
    fn test_non_table_tool_gets_no_table_args() {
        let rules = ArgumentRules::default();
        let hints = vec!["devices".to_string()];
        let args = apply_argument_defaults(&rules, "mysql_ping", Map::new(), &hints, &[], None);
        assert!(args.is_empty());
    }

    #[test]
    fn test_start_counts_as_offset() {
        let rules = ArgumentRules::default();
        let mut model_args = Map::new();
        model_args.insert("start".into(), json!(20));
        let args = apply_argument_defaults(&rules, "mysql_list_rows", model_args, &[], &[], None);
        assert!(!args.contains_key("offset"));
        assert_eq!(args["start"], json!(20));
    }

    #[test]
    fn test_parse_planner_tool_accepts_string_encoded_payloads() {
        let parsed = json!({
            "decision": "tool",
            "tool": "{\"name\":\"mysql_list_rows\",\"arguments\":\"{\\\"limit\\\":3}\"}"
        });
        let (name, args) = parse_planner_tool(&parsed).unwrap();
        assert_eq!(name, "mysql_list_rows");
        assert_eq!(args["limit"], json!(3));
    }

    #[test]
    fn test_parse_planner_tool_rejects_sql_decision() {
        assert!(parse_planner_tool(&json!({"decision":"sql","tool":null})).is_none());
        assert!(parse_planner_tool(&json!({"decision":"tool","tool":null})).is_none());
        assert!(parse_planner_tool(&json!({"decision":"tool","tool":{"arguments":{}}})).is_none());
    }

    #[test]
    fn test_select_planner_tools_without_ranking_takes_first_eight() {
        let tools: Vec<ToolDefinition> = (0..12).map(|i| tool(&format!("tool_{i}"))).collect();
        let selected = select_planner_tools(&tools, None);
        assert_eq!(selected.len(), 8);
        assert_eq!(selected[0].name, "tool_0");
    }

    #[test]
    fn test_select_planner_tools_merges_ranking_with_definitions() {
        let tools = vec![tool("mysql_list_rows")];
        let ranking = ToolRanking {
            tools: vec![RankedTool {
                name: "mysql_list_rows".into(),
                description: None,
                input_schema: None,
                argument_suggestions: Some(Map::from_iter([("limit".to_string(), json!(10))])),
                score: Some(0.9),
            }],
            ..Default::default()
        };
        let selected = select_planner_tools(&tools, Some(&ranking));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].description.as_deref(), Some("mysql_list_rows tool"));
        assert_eq!(selected[0].score, Some(0.9));
        assert!(selected[0].argument_suggestions.is_some());
    }
}
