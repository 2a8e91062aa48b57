//! HTTP surface over the pipeline.
//!
//! Routes:
//! - `POST /generate` — run the full pipeline for a prompt
//! - `GET /health` — liveness check
//! - `GET /tools` — list the connected toolbox's tools
//! - `POST /tools/call` — invoke one tool directly
//! - `GET /debug` / `POST /debug/toggle` — inspect and flip debug mode

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;

use crate::pipeline::{Pipeline, PipelineError};
use crate::types::{missing_prompt_detail, pipeline_error_body, GenerateRequest};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

pub struct GatewayServer {
    pipeline: Arc<Pipeline>,
    host: String,
    port: u16,
}

impl GatewayServer {
    pub fn new(pipeline: Arc<Pipeline>, host: &str, port: u16) -> Self {
        Self {
            pipeline,
            host: host.to_string(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
        };
        Router::new()
            .route("/generate", post(handle_generate))
            .route("/health", get(handle_health))
            .route("/tools", get(handle_list_tools))
            .route("/tools/call", post(handle_call_tool))
            .route("/debug", get(handle_debug_status))
            .route("/debug/toggle", post(handle_debug_toggle))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Gateway listening on {}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> impl IntoResponse {
    match state.pipeline.run(request).await {
        Ok(response) => (
            StatusCode::OK,
            Json(serde_json::to_value(&response).unwrap_or_default()),
        ),
        Err(PipelineError::MissingPrompt) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(missing_prompt_detail()))
        }
        Err(PipelineError::Failed { message, debug }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(pipeline_error_body(&message, debug)),
        ),
    }
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn handle_list_tools(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.invoker().list_tools().await {
        Ok(tools) => (StatusCode::OK, Json(json!({ "tools": tools }))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to list tools", "message": err.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct ToolCallRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

async fn handle_call_tool(
    State(state): State<AppState>,
    Json(request): Json<ToolCallRequest>,
) -> impl IntoResponse {
    let Some(name) = request.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "'name' is required" })),
        );
    };
    let args = request.args.unwrap_or_default();
    match state.pipeline.invoker().call_tool(name, &args).await {
        Ok(result) => (StatusCode::OK, Json(json!({ "result": result }))),
        Err(err) => {
            tracing::error!(tool = name, error = %err, "Tool call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Tool execution failed", "message": err.to_string() })),
            )
        }
    }
}

async fn handle_debug_status(State(state): State<AppState>) -> Json<Value> {
    let enabled = state.pipeline.debug_mode();
    Json(json!({
        "debugMode": enabled,
        "message": format!("Debug mode is {}", if enabled { "enabled" } else { "disabled" }),
    }))
}

async fn handle_debug_toggle(State(state): State<AppState>) -> Json<Value> {
    let enabled = state.pipeline.toggle_debug();
    tracing::info!("Debug mode {}", if enabled { "enabled" } else { "disabled" });
    Json(json!({
        "debugMode": enabled,
        "message": format!("Debug mode {}", if enabled { "enabled" } else { "disabled" }),
    }))
}
