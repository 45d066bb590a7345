pub mod conversation;
pub mod openai;
pub mod providers;
pub mod runtime;
pub mod tools;
pub mod truncation;

pub use conversation::{ConversationDigest, ConversationStore};
pub use openai::OpenAiProvider;
pub use providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream,
    LlmStreamResponse, MessagePart, StreamContent, ToolCallFragment, ToolDefinition, Usage,
};
pub use runtime::{AgentRuntime, RuntimeLimits, ToolCallObserver, TurnOutcome};
pub use tools::{BoundTools, FnTool, Tool, ToolHost, ToolRegistry};
