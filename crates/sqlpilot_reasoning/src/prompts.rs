//! Prompt assembly for the routing planner.

use crate::hints::{EntityHint, RankedTool};

const SCHEMA_SUMMARY_LIMIT: usize = 4000;

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a routing planner for a SQL assistant that can either call predefined MCP tools or let the assistant generate raw SQL.

Decide the best approach for the given request.
- Prefer calling a tool when one can fully satisfy the request using its capabilities.
- Only choose a tool if the description and parameters align with the request.
- If no tool is suitable, respond with a decision of "sql".
- When choosing "sql", do not propose a tool fallback.
- Never invent tools or arguments.
- Always include every required argument the tool expects.
- If the user omits numeric parameters such as limit or offset, default to limit=50 and offset=0.
- If a tool needs a table name, infer the closest match from the provided schema.
- Respond only with raw JSON matching the schema below (no markdown, code fences, or explanations).

Respond with a single JSON object matching this schema (no extra text):
{
  "decision": "tool" | "sql",
  "reason": string,
  "tool": {
    "name": string,
    "arguments": object
  } | null
}
If decision is "sql", set "tool" to null."#;

/// Cap the schema text so the planner prompt stays within context limits.
pub fn summarize_schema(schema: &str) -> String {
    let trimmed = schema.trim();
    if trimmed.is_empty() {
        return "(schema not provided)".to_string();
    }
    if trimmed.len() <= SCHEMA_SUMMARY_LIMIT {
        return trimmed.to_string();
    }
    let mut cut = SCHEMA_SUMMARY_LIMIT;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n...[truncated]", &trimmed[..cut])
}

fn format_tool(tool: &RankedTool) -> String {
    let mut parts = vec![format!("- {}", tool.name)];
    if let Some(desc) = tool.description.as_deref().filter(|d| !d.is_empty()) {
        parts.push(format!("  description: {desc}"));
    }
    match &tool.input_schema {
        Some(schema) => parts.push(format!("  arguments: {schema}")),
        None => parts.push("  arguments: none".to_string()),
    }
    parts.join("\n")
}

pub fn build_planner_user_prompt(
    prompt: &str,
    schema: &str,
    tools: &[RankedTool],
    toolset_name: Option<&str>,
    table_hints: &[String],
    filter_hints: &[EntityHint],
) -> String {
    let header = match toolset_name {
        Some(name) => format!("Available tools in toolset \"{name}\":"),
        None => "Available tools:".to_string(),
    };
    let tool_summaries = tools.iter().map(format_tool).collect::<Vec<_>>().join("\n\n");
    let table_line = if table_hints.is_empty() {
        String::new()
    } else {
        format!("Likely relevant tables: {}.", table_hints.join(", "))
    };
    let filter_line = if filter_hints.is_empty() {
        String::new()
    } else {
        let rendered = filter_hints
            .iter()
            .map(|hint| {
                let text = hint.text.as_deref().unwrap_or("");
                match hint.kind.as_deref() {
                    Some(kind) => format!("{kind}={text}"),
                    None => text.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("Likely entity filters: {rendered}.")
    };
    format!(
        "User request:\n{}\n\n{header}\n{tool_summaries}\n\n{table_line}\n{filter_line}\nSchema summary (may be truncated):\n{}",
        prompt.trim(),
        summarize_schema(schema)
    )
}
