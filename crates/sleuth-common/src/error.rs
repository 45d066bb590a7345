use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("debugger error: {0}")]
    Debugger(String),

    #[error("target error: {0}")]
    Target(String),

    #[error("state error: {0}")]
    State(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short error class used in `{"error": "<Kind>: <message>"}` tool payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Provider(_) => "ProviderError",
            Error::Agent(_) => "AgentError",
            Error::Tool(_) => "ToolError",
            Error::Validation(_) => "ValidationError",
            Error::Debugger(_) => "DebuggerError",
            Error::Target(_) => "TargetError",
            Error::State(_) => "StateError",
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
        }
    }

    /// The message without the variant prefix added by `Display`.
    pub fn detail(&self) -> String {
        match self {
            Error::Config(m)
            | Error::Provider(m)
            | Error::Agent(m)
            | Error::Tool(m)
            | Error::Validation(m)
            | Error::Debugger(m)
            | Error::Target(m)
            | Error::State(m) => m.clone(),
            Error::Io(e) => e.to_string(),
            Error::Serialization(e) => e.to_string(),
        }
    }

    /// Render as the `"<Kind>: <message>"` string carried by tool error payloads.
    pub fn to_payload_message(&self) -> String {
        format!("{}: {}", self.kind(), self.detail())
    }
}
