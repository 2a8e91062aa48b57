pub mod pipeline;
pub mod schema;
pub mod server;
pub mod types;

pub use pipeline::{Pipeline, PipelineError};
pub use schema::SchemaResolver;
pub use server::GatewayServer;
pub use types::{GenerateRequest, GenerateResponse};
