//! End-to-end generation pipeline.
//!
//! One request runs: schema resolution, an optional tool-planning round,
//! raw SQL generation with extraction, execution through the toolbox, and
//! a training log write. Tool-path failures never fail the request; they
//! fall back to the SQL strategy with the failure noted on the response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use sqlpilot_core::config::SqlpilotConfig;
use sqlpilot_core::tools::ToolInvoker;
use sqlpilot_core::types::{SchemaSource, Strategy};
use sqlpilot_log::{TrainingLogEntry, TrainingLogSink};
use sqlpilot_reasoning::hints::{EntityHint, HintClient};
use sqlpilot_reasoning::{
    generate_sql, plan_tool_usage, ArgumentRules, ChatClient, PlanRequest, PlannedAction,
};

use crate::schema::SchemaResolver;
use crate::types::{GenerateRequest, GenerateResponse, PlannerSummary, ToolCallInfo};

const DEBUG_SCHEMA_SNIPPET: usize = 2000;

pub enum PipelineError {
    MissingPrompt,
    Failed { message: String, debug: Option<Value> },
}

/// Per-request bookkeeping surfaced through the debug block.
#[derive(Default)]
struct RequestTrace {
    planner: Option<Value>,
    llm: Option<Value>,
    execution: Option<Value>,
}

pub struct Pipeline {
    invoker: Arc<dyn ToolInvoker>,
    providers: HashMap<String, Arc<dyn ChatClient>>,
    default_provider: String,
    hints: HintClient,
    schema: SchemaResolver,
    training_log: Arc<dyn TrainingLogSink>,
    rules: ArgumentRules,
    system_prompt: String,
    use_rag_hints_default: bool,
    execute_tool: String,
    debug_mode: AtomicBool,
}

impl Pipeline {
    pub fn new(
        config: &SqlpilotConfig,
        invoker: Arc<dyn ToolInvoker>,
        providers: HashMap<String, Arc<dyn ChatClient>>,
        hints: HintClient,
        schema: SchemaResolver,
        training_log: Arc<dyn TrainingLogSink>,
    ) -> Self {
        Self {
            invoker,
            providers,
            default_provider: config.llm.default_provider.clone(),
            hints,
            schema,
            training_log,
            rules: ArgumentRules {
                execute_tool: config.toolbox.execute_tool.clone(),
                ..ArgumentRules::default()
            },
            system_prompt: config.llm.system_prompt.clone(),
            use_rag_hints_default: config.llm.use_rag_hints,
            execute_tool: config.toolbox.execute_tool.clone(),
            debug_mode: AtomicBool::new(false),
        }
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::SeqCst)
    }

    /// Flips debug mode and returns the new value.
    pub fn toggle_debug(&self) -> bool {
        !self.debug_mode.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn invoker(&self) -> &Arc<dyn ToolInvoker> {
        &self.invoker
    }

    fn chat_client(&self, provider: &str) -> Result<&Arc<dyn ChatClient>, PipelineError> {
        self.providers
            .get(provider)
            .or_else(|| self.providers.get(&self.default_provider))
            .ok_or_else(|| PipelineError::Failed {
                message: format!("No chat provider configured for '{provider}'"),
                debug: None,
            })
    }

    fn log_entry(&self, entry: TrainingLogEntry) {
        let sink = self.training_log.clone();
        tokio::spawn(async move {
            sink.record(entry).await;
        });
    }

    fn debug_block(
        &self,
        started: Instant,
        schema: &str,
        source: SchemaSource,
        trace: &RequestTrace,
    ) -> Value {
        let mut snippet_end = DEBUG_SCHEMA_SNIPPET.min(schema.len());
        while !schema.is_char_boundary(snippet_end) {
            snippet_end -= 1;
        }
        json!({
            "mode": "enabled",
            "totalDurationMs": started.elapsed().as_millis() as u64,
            "schema": {
                "source": source.as_str(),
                "length": schema.len(),
                "snippet": &schema[..snippet_end],
            },
            "planner": &trace.planner,
            "llm": &trace.llm,
            "execution": &trace.execution,
        })
    }

    pub async fn run(&self, request: GenerateRequest) -> Result<GenerateResponse, PipelineError> {
        let prompt = request
            .prompt
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(PipelineError::MissingPrompt)?;

        let resolved = self.schema.resolve(request.schema.as_deref()).await;
        let schema = resolved.schema;
        let schema_source = resolved.source;

        let started = Instant::now();
        let mut trace = RequestTrace::default();

        let provider_name = request
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.default_provider)
            .to_string();
        let chat = self.chat_client(&provider_name)?.clone();
        let model = request.model.as_deref().map(str::trim).filter(|m| !m.is_empty());
        let toolset_name = request
            .toolset_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let mut tool_call: Option<ToolCallInfo> = None;
        let mut planner_summary: Option<PlannerSummary> = None;
        let mut planner_debug: Option<Value> = None;
        let mut planner_filter_hints: Option<Vec<EntityHint>> = None;

        if request.use_toolset.unwrap_or(false) {
            match self
                .try_tool_strategy(
                    &prompt,
                    &schema,
                    schema_source,
                    chat.as_ref(),
                    model,
                    toolset_name,
                    &provider_name,
                    started,
                    &mut trace,
                )
                .await
            {
                ToolAttempt::Completed(response) => return Ok(response),
                ToolAttempt::FellThrough {
                    tool_call: fallback_tool_call,
                    planner: summary,
                    planner_debug: details,
                    filter_hints,
                } => {
                    tool_call = fallback_tool_call;
                    planner_summary = summary;
                    planner_debug = details;
                    planner_filter_hints = filter_hints;
                }
            }
        }

        let generation_prompt = self
            .prompt_with_entity_hints(&prompt, &request, planner_filter_hints)
            .await;

        let generation = match generate_sql(
            chat.as_ref(),
            &self.system_prompt,
            &generation_prompt,
            &schema,
            model,
        )
        .await
        {
            Ok(generation) => generation,
            Err(err) => {
                return Err(self.fail(
                    err.to_string(),
                    &prompt,
                    &schema,
                    schema_source,
                    &provider_name,
                    model,
                    Strategy::Sql,
                    tool_call,
                    planner_summary,
                    started,
                    trace,
                ));
            }
        };
        trace.llm = Some(json!({
            "request": generation.request,
            "response": generation.response,
            "usage": generation.usage.clone(),
        }));

        let execution_started = Instant::now();
        let mut args = Map::new();
        args.insert("sql".to_string(), Value::String(generation.sql.clone()));
        let execution_result = match self.invoker.call_tool(&self.execute_tool, &args).await {
            Ok(result) => result,
            Err(err) => {
                trace.execution = Some(json!({ "error": err.to_string(), "sql": generation.sql }));
                return Err(self.fail(
                    err.to_string(),
                    &prompt,
                    &schema,
                    schema_source,
                    &provider_name,
                    model,
                    Strategy::Sql,
                    tool_call,
                    planner_summary,
                    started,
                    trace,
                ));
            }
        };
        trace.execution = Some(json!({
            "durationMs": execution_started.elapsed().as_millis() as u64,
            "result": execution_result,
        }));

        let debug = self
            .debug_mode()
            .then(|| self.debug_block(started, &schema, schema_source, &trace));

        self.log_entry(TrainingLogEntry {
            prompt: prompt.clone(),
            model_output: Some(Value::String(generation.raw_content.clone())),
            sql: Some(generation.sql.clone()),
            execution_result: Some(execution_result.clone()),
            has_error: false,
            error_message: None,
            provider: Some(provider_name.clone()),
            model: model.map(str::to_string),
            strategy: Some(Strategy::Sql.as_str().to_string()),
            tool_call: tool_call.as_ref().and_then(|tc| serde_json::to_value(tc).ok()),
            planner: planner_summary
                .as_ref()
                .and_then(|p| serde_json::to_value(p).ok()),
            schema_source: Some(schema_source.as_str().to_string()),
            duration_ms: Some(started.elapsed().as_millis() as i64),
            usage: generation.usage.clone(),
            metadata: training_metadata(planner_debug.as_ref(), toolset_name),
        });

        Ok(GenerateResponse {
            prompt,
            sql: Some(generation.sql),
            raw_model_output: Some(generation.raw_content),
            execution_result: Some(execution_result),
            schema_source: schema_source.as_str().to_string(),
            usage: generation.usage,
            provider: provider_name,
            model: model.map(str::to_string),
            strategy: Strategy::Sql.as_str().to_string(),
            tool_call,
            planner: planner_summary,
            planner_debug,
            debug,
        })
    }

    /// Run the planner and, when it picks a tool, execute it. Any failure
    /// along the way reverts to the SQL strategy.
    #[allow(clippy::too_many_arguments)]
    async fn try_tool_strategy(
        &self,
        prompt: &str,
        schema: &str,
        schema_source: SchemaSource,
        chat: &dyn ChatClient,
        model: Option<&str>,
        toolset_name: Option<&str>,
        provider_name: &str,
        started: Instant,
        trace: &mut RequestTrace,
    ) -> ToolAttempt {
        let tools = match self.invoker.list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                warn!(error = %err, "Toolset planner failed (falling back to SQL)");
                trace.planner = Some(json!({ "error": err.to_string() }));
                return ToolAttempt::FellThrough {
                    tool_call: None,
                    planner: Some(PlannerSummary {
                        decision: "error".to_string(),
                        reason: Some(err.to_string()),
                        tool: None,
                    }),
                    planner_debug: None,
                    filter_hints: None,
                };
            }
        };

        let outcome = match plan_tool_usage(
            chat,
            &self.hints,
            &self.rules,
            PlanRequest {
                prompt,
                schema,
                tools: &tools,
                toolset_name,
                model,
            },
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Toolset planner failed (falling back to SQL)");
                trace.planner = Some(json!({ "error": err.to_string() }));
                return ToolAttempt::FellThrough {
                    tool_call: None,
                    planner: Some(PlannerSummary {
                        decision: "error".to_string(),
                        reason: Some(err.to_string()),
                        tool: None,
                    }),
                    planner_debug: None,
                    filter_hints: None,
                };
            }
        };

        debug!(
            decision = outcome.action.decision(),
            reason = %outcome.reason,
            "toolset planner decision"
        );

        let reason = Some(outcome.reason.clone()).filter(|r| !r.is_empty());
        let planner_debug = serde_json::to_value(&outcome.debug).ok();
        let filter_hints = Some(outcome.debug.filter_hints.clone());
        let summary = PlannerSummary {
            decision: outcome.action.decision().to_string(),
            reason: reason.clone(),
            tool: match &outcome.action {
                PlannedAction::Tool { name, .. } => Some(json!({
                    "name": name,
                    "description": outcome
                        .tool_definition
                        .as_ref()
                        .and_then(|t| t.description.clone()),
                })),
                PlannedAction::Sql => None,
            },
        };
        trace.planner = Some(json!({
            "request": outcome.request,
            "response": outcome.response,
            "rawContent": outcome.raw_content.clone(),
            "decision": outcome.action.decision(),
            "reason": reason.clone(),
            "toolDefinition": outcome.tool_definition.clone(),
            "details": planner_debug.clone(),
        }));

        let (name, arguments) = match outcome.action {
            PlannedAction::Tool { name, arguments } => (name, arguments),
            PlannedAction::Sql => {
                return ToolAttempt::FellThrough {
                    tool_call: reason.clone().map(|reason| ToolCallInfo {
                        name: None,
                        arguments: None,
                        reason: Some(reason),
                    }),
                    planner: Some(summary),
                    planner_debug,
                    filter_hints,
                };
            }
        };

        let execution_started = Instant::now();
        match self.invoker.call_tool(&name, &arguments).await {
            Ok(result) => {
                trace.execution = Some(json!({
                    "durationMs": execution_started.elapsed().as_millis() as u64,
                    "result": result,
                    "toolName": name,
                    "arguments": arguments,
                }));
                let tool_call = ToolCallInfo {
                    name: Some(name.clone()),
                    arguments: Some(Value::Object(arguments.clone())),
                    reason: reason.clone(),
                };
                let debug = self
                    .debug_mode()
                    .then(|| self.debug_block(started, schema, schema_source, trace));

                self.log_entry(TrainingLogEntry {
                    prompt: prompt.to_string(),
                    model_output: outcome.raw_content.clone().map(Value::String),
                    sql: None,
                    execution_result: Some(result.clone()),
                    has_error: false,
                    error_message: None,
                    provider: Some(provider_name.to_string()),
                    model: model.map(str::to_string),
                    strategy: Some(Strategy::Tool.as_str().to_string()),
                    tool_call: serde_json::to_value(&tool_call).ok(),
                    planner: serde_json::to_value(&summary).ok(),
                    schema_source: Some(schema_source.as_str().to_string()),
                    duration_ms: Some(started.elapsed().as_millis() as i64),
                    usage: outcome.usage.clone(),
                    metadata: training_metadata(planner_debug.as_ref(), toolset_name),
                });

                ToolAttempt::Completed(GenerateResponse {
                    prompt: prompt.to_string(),
                    sql: None,
                    raw_model_output: outcome.raw_content,
                    execution_result: Some(result),
                    schema_source: schema_source.as_str().to_string(),
                    usage: outcome.usage,
                    provider: provider_name.to_string(),
                    model: model.map(str::to_string),
                    strategy: Strategy::Tool.as_str().to_string(),
                    tool_call: Some(tool_call),
                    planner: Some(summary),
                    planner_debug,
                    debug,
                })
            }
            Err(err) => {
                warn!(tool = %name, error = %err, "Tool execution via planner failed");
                trace.execution = Some(json!({
                    "error": err.to_string(),
                    "toolName": name,
                    "arguments": arguments,
                }));
                let annotated = match &reason {
                    Some(reason) => format!("{reason} (tool execution failed: {err})"),
                    None => format!("Tool execution failed: {err}"),
                };
                ToolAttempt::FellThrough {
                    tool_call: Some(ToolCallInfo {
                        name: Some(name),
                        arguments: Some(Value::Object(arguments)),
                        reason: Some(annotated),
                    }),
                    planner: Some(summary),
                    planner_debug,
                    filter_hints,
                }
            }
        }
    }

    /// Prepend entity filter hints to the generation prompt when enabled,
    /// reusing the planner's hints before searching again.
    async fn prompt_with_entity_hints(
        &self,
        prompt: &str,
        request: &GenerateRequest,
        planner_hints: Option<Vec<EntityHint>>,
    ) -> String {
        let enabled = request.use_rag_hints.unwrap_or(self.use_rag_hints_default);
        if !enabled {
            return prompt.to_string();
        }
        // The planner's hint list is authoritative when it ran, empty or not;
        // only a skipped planner round triggers a fresh search.
        let hints = match planner_hints {
            Some(hints) => hints,
            None => self.hints.search_entities(prompt, 5).await,
        };
        if hints.is_empty() {
            return prompt.to_string();
        }
        let mapped = hints
            .iter()
            .take(5)
            .map(|hint| {
                format!(
                    "{}={}",
                    hint.kind.as_deref().unwrap_or("entity"),
                    hint.text.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Entity hints: {mapped}\n\
             - If device_name is present, prefer WHERE devices.name = 'VALUE'\n\
             - If location is present, prefer WHERE locations.name = 'VALUE' or devices.location = 'VALUE'\n\n{prompt}"
        )
    }

    /// Record the failure in the training log and shape the error payload.
    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        message: String,
        prompt: &str,
        schema: &str,
        schema_source: SchemaSource,
        provider: &str,
        model: Option<&str>,
        strategy: Strategy,
        tool_call: Option<ToolCallInfo>,
        planner_summary: Option<PlannerSummary>,
        started: Instant,
        trace: RequestTrace,
    ) -> PipelineError {
        warn!(error = %message, "Generation pipeline failed");
        self.log_entry(TrainingLogEntry {
            prompt: prompt.to_string(),
            model_output: trace.llm.as_ref().and_then(|l| l.get("response")).cloned(),
            sql: None,
            execution_result: trace
                .execution
                .as_ref()
                .and_then(|e| e.get("result"))
                .cloned(),
            has_error: true,
            error_message: Some(message.clone()),
            provider: Some(provider.to_string()),
            model: model.map(str::to_string),
            strategy: Some(strategy.as_str().to_string()),
            tool_call: tool_call.as_ref().and_then(|tc| serde_json::to_value(tc).ok()),
            planner: planner_summary
                .as_ref()
                .and_then(|p| serde_json::to_value(p).ok()),
            schema_source: Some(schema_source.as_str().to_string()),
            duration_ms: Some(started.elapsed().as_millis() as i64),
            usage: None,
            metadata: None,
        });

        let debug = self
            .debug_mode()
            .then(|| self.debug_block(started, schema, schema_source, &trace));
        PipelineError::Failed { message, debug }
    }
}

enum ToolAttempt {
    Completed(GenerateResponse),
    FellThrough {
        tool_call: Option<ToolCallInfo>,
        planner: Option<PlannerSummary>,
        planner_debug: Option<Value>,
        filter_hints: Option<Vec<EntityHint>>,
    },
}

fn training_metadata(planner_debug: Option<&Value>, toolset_name: Option<&str>) -> Option<Value> {
    let mut metadata = Map::new();
    if let Some(debug) = planner_debug {
        metadata.insert("plannerDebug".to_string(), debug.clone());
    }
    if let Some(name) = toolset_name {
        metadata.insert("toolsetName".to_string(), Value::String(name.to_string()));
    }
    if metadata.is_empty() {
        None
    } else {
        Some(Value::Object(metadata))
    }
}
