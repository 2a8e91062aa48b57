use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use sqlpilot_core::SqlpilotConfig;
use sqlpilot_gateway::{GatewayServer, Pipeline, SchemaResolver};
use sqlpilot_log::{NullTrainingLog, SqliteTrainingLog, TrainingLogSink};
use sqlpilot_mcp::ToolboxClient;
use sqlpilot_reasoning::providers::{CustomClient, DeepseekClient, GeminiClient};
use sqlpilot_reasoning::{ChatClient, HintClient};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "sqlpilot.toml")]
    config: String,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = SqlpilotConfig::load_or_default(&args.config);
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let invoker = Arc::new(ToolboxClient::new(config.toolbox.clone()));

    let mut providers: HashMap<String, Arc<dyn ChatClient>> = HashMap::new();
    match DeepseekClient::new(&config.llm.deepseek) {
        Ok(client) => {
            providers.insert("deepseek".to_string(), Arc::new(client));
        }
        Err(err) => warn!("DeepSeek provider unavailable: {}", err),
    }
    match GeminiClient::new(&config.llm.gemini) {
        Ok(client) => {
            providers.insert("gemini".to_string(), Arc::new(client));
        }
        Err(err) => warn!("Gemini provider unavailable: {}", err),
    }
    match CustomClient::new(&config.llm.custom) {
        Ok(client) => {
            providers.insert("custom".to_string(), Arc::new(client));
        }
        Err(err) => warn!("Custom provider unavailable: {}", err),
    }
    if providers.is_empty() {
        anyhow::bail!("No chat provider is configured; set at least one API key or base URL");
    }
    info!(
        "Chat providers ready: {}",
        providers.keys().cloned().collect::<Vec<_>>().join(", ")
    );

    let hints = HintClient::new(config.hints.base_url.clone());
    if hints.is_configured() {
        info!("Hint service enabled at {:?}", config.hints.base_url);
    }

    let training_log: Arc<dyn TrainingLogSink> = match &config.training_log.db_path {
        Some(path) => match SqliteTrainingLog::new(path).await {
            Ok(log) => {
                info!("Training log at {}", path);
                Arc::new(log)
            }
            Err(err) => {
                warn!("Training log disabled: {}", err);
                Arc::new(NullTrainingLog)
            }
        },
        None => Arc::new(NullTrainingLog),
    };

    let schema = SchemaResolver::new(
        invoker.clone(),
        config.schema.clone(),
        config.toolbox.clone(),
    );
    let pipeline = Arc::new(Pipeline::new(
        &config,
        invoker,
        providers,
        hints,
        schema,
        training_log,
    ));

    let server = GatewayServer::new(pipeline, &config.server.host, config.server.port);
    server.serve().await
}
