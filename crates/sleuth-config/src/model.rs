use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration, read from `config.toml`.
///
/// Every field has a default so a partial (or empty) file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub debugger: DebuggerConfig,

    #[serde(default)]
    pub state: StateConfig,

    /// Always steer prompts toward the perf-checkpoint workflow.
    #[serde(default)]
    pub perf_mode: bool,
}

/// Chat-completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: Option<f64>,

    /// Extra attempts after a retryable provider failure (429, 5xx, timeouts).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            max_retries: default_max_retries(),
        }
    }
}

/// Tool-calling loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Identical calls to a guarded tool allowed per turn before blocking.
    #[serde(default = "default_loop_guard_threshold")]
    pub loop_guard_threshold: usize,

    #[serde(default = "default_guarded_tools")]
    pub guarded_tools: Vec<String>,

    #[serde(default = "default_max_conversation_messages")]
    pub max_conversation_messages: usize,

    #[serde(default = "default_max_tool_result_length")]
    pub max_tool_result_length: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            loop_guard_threshold: default_loop_guard_threshold(),
            guarded_tools: default_guarded_tools(),
            max_conversation_messages: default_max_conversation_messages(),
            max_tool_result_length: default_max_tool_result_length(),
        }
    }
}

/// Target process and stop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Interpreter used to launch the target.
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_true")]
    pub break_on_exception: bool,

    #[serde(default)]
    pub break_on_entry: bool,

    #[serde(default)]
    pub trace_memory: bool,

    /// Cap, in characters, on stdout/stderr captured while evaluating expressions.
    #[serde(default = "default_eval_output_limit")]
    pub eval_output_limit: usize,

    #[serde(default = "default_source_context_lines")]
    pub source_context_lines: usize,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            break_on_exception: true,
            break_on_entry: false,
            trace_memory: false,
            eval_output_limit: default_eval_output_limit(),
            source_context_lines: default_source_context_lines(),
        }
    }
}

/// Checkpoint persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_true")]
    pub auto_save: bool,

    #[serde(default = "default_max_auto_states")]
    pub max_auto_states_per_script: usize,

    #[serde(default = "default_issues_dir")]
    pub issues_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            auto_save: true,
            max_auto_states_per_script: default_max_auto_states(),
            issues_dir: default_issues_dir(),
        }
    }
}

fn default_base_url() -> String {
    "https://inference.baseten.co/v1".to_string()
}

fn default_model() -> String {
    "zai-org/GLM-4.7".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_retries() -> u32 {
    1
}

fn default_max_tool_rounds() -> usize {
    25
}

fn default_loop_guard_threshold() -> usize {
    2
}

fn default_guarded_tools() -> Vec<String> {
    vec![
        "replace_text_in_file".to_string(),
        "replace_file_contents".to_string(),
    ]
}

fn default_max_conversation_messages() -> usize {
    100
}

fn default_max_tool_result_length() -> usize {
    8000
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_eval_output_limit() -> usize {
    2000
}

fn default_source_context_lines() -> usize {
    10
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".sleuth").join("state")
}

fn default_issues_dir() -> PathBuf {
    PathBuf::from(".sleuth").join("issues")
}

fn default_max_auto_states() -> usize {
    20
}
