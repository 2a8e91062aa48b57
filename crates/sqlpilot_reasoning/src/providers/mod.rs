pub mod custom;
pub mod deepseek;
pub mod gemini;
pub mod mock;

pub use custom::CustomClient;
pub use deepseek::DeepseekClient;
pub use gemini::GeminiClient;
pub use mock::MockChatClient;
