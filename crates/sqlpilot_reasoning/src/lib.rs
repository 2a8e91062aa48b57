pub mod extractor;
pub mod hints;
pub mod llm;
pub mod planner;
pub mod prompts;
pub mod providers;
pub mod sqlgen;

pub use extractor::extract_sql;
pub use hints::HintClient;
pub use llm::{ChatClient, ChatOutcome};
pub use planner::{plan_tool_usage, ArgumentRules, PlanOutcome, PlanRequest, PlannedAction};
pub use sqlgen::{generate_sql, SqlGeneration};
