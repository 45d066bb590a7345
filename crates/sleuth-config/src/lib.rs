pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{AgentConfig, AppConfig, DebuggerConfig, LlmConfig, StateConfig};
