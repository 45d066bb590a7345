//! The debug tool set the model drives a session through.

pub mod breakpoints;
pub mod execution;
pub mod memory;
pub mod runtime;
pub mod source;
pub mod state;

use serde::Deserialize;
use serde_json::{Value, json};
use sleuth_agents::ToolRegistry;

use crate::context::{DebugContext, Phase};

pub type DebugTools = ToolRegistry<DebugContext>;

/// Tools with no arguments deserialize into this.
#[derive(Debug, Default, Deserialize)]
pub struct NoArgs {}

/// Tools available before the target starts.
pub const PRE_RUN_TOOLS: &[&str] = &[
    "get_source_file",
    "find_snippet_lines",
    "replace_file_contents",
    "replace_text_in_file",
    "set_breakpoint",
    "remove_breakpoint",
    "list_breakpoints",
    "add_watch",
    "remove_watch",
    "get_watches",
    "set_focus",
    "clear_focus",
    "save_checkpoint_state",
    "save_operation_checkpoint",
    "list_checkpoint_states",
    "load_checkpoint_state",
    "queue_checkpoint_restore",
    "list_perf_checkpoints",
    "compare_perf_checkpoints",
    "generate_perf_issue_report",
    "run_target",
];

/// Tools available after the target exits. Nothing here touches a live frame.
pub const POST_RUN_TOOLS: &[&str] = &[
    "get_source_file",
    "find_snippet_lines",
    "replace_file_contents",
    "replace_text_in_file",
    "set_breakpoint",
    "remove_breakpoint",
    "list_breakpoints",
    "add_watch",
    "remove_watch",
    "get_watches",
    "set_focus",
    "clear_focus",
    "save_checkpoint_state",
    "save_operation_checkpoint",
    "list_checkpoint_states",
    "load_checkpoint_state",
    "queue_checkpoint_restore",
    "list_perf_checkpoints",
    "compare_perf_checkpoints",
    "generate_perf_issue_report",
    "rerun_target",
];

/// Build the registry with every debug tool.
pub fn build_registry(max_result_length: usize) -> DebugTools {
    let mut registry = ToolRegistry::new().with_max_result_length(max_result_length);
    runtime::register(&mut registry);
    source::register(&mut registry);
    breakpoints::register(&mut registry);
    execution::register(&mut registry);
    memory::register(&mut registry);
    state::register(&mut registry);
    registry
}

/// Names of the tools the model may call in `phase`.
pub fn tools_for_phase(registry: &DebugTools, phase: Phase) -> Vec<&str> {
    match phase {
        Phase::PreRun => PRE_RUN_TOOLS.to_vec(),
        Phase::PostRun => POST_RUN_TOOLS.to_vec(),
        Phase::Live => registry
            .list_tools()
            .into_iter()
            .filter(|name| *name != "run_target")
            .collect(),
    }
}

/// `{"error": message}` for refusals that are not failures of the tool.
pub(crate) fn refusal(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

/// Schema of a tool without parameters.
pub(crate) fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}
