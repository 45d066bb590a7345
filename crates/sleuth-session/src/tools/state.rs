//! Checkpoint and perf-checkpoint tools.

use serde::Deserialize;
use serde_json::json;
use sleuth_agents::FnTool;
use sleuth_agents::tools::ToolFuture;

use super::{DebugTools, NoArgs, empty_schema};
use crate::context::DebugContext;
use crate::perf::IssueReportRequest;

pub fn register(registry: &mut DebugTools) {
    registry.register(FnTool::new(
        "save_checkpoint_state",
        "Save breakpoints, watches, focus, the current stop, memory and perf data under a \
         name that is never pruned.",
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}}
        }),
        save_checkpoint_state,
    ));
    registry.register(FnTool::new(
        "save_operation_checkpoint",
        "Save an automatic checkpoint before a risky operation.",
        json!({
            "type": "object",
            "properties": {"operation": {"type": "string"}},
            "required": ["operation"]
        }),
        save_operation_checkpoint,
    ));
    registry.register(FnTool::new(
        "list_checkpoint_states",
        "Saved checkpoints for this script, newest first.",
        json!({
            "type": "object",
            "properties": {"all_scripts": {"type": "boolean"}}
        }),
        list_checkpoint_states,
    ));
    registry.register(FnTool::new(
        "load_checkpoint_state",
        "Restore a checkpoint (`latest`, a file path or a manual save name). Applies now when \
         paused or after the run; otherwise it is queued for the next run.",
        json!({
            "type": "object",
            "properties": {
                "selector": {"type": "string"},
                "apply_now": {"type": "boolean"}
            }
        }),
        load_checkpoint_state,
    ));
    registry.register(FnTool::new(
        "queue_checkpoint_restore",
        "Restore a checkpoint when the target next starts.",
        json!({
            "type": "object",
            "properties": {"selector": {"type": "string"}}
        }),
        queue_checkpoint_restore,
    ));
    registry.register(FnTool::new(
        "create_perf_checkpoint",
        "Record wall time, CPU time and traced memory at the current pause.",
        json!({
            "type": "object",
            "properties": {"label": {"type": "string"}}
        }),
        create_perf_checkpoint,
    ));
    registry.register(FnTool::new(
        "list_perf_checkpoints",
        "Perf checkpoints recorded so far, oldest first.",
        empty_schema(),
        list_perf_checkpoints,
    ));
    registry.register(FnTool::new(
        "compare_perf_checkpoints",
        "Wall, CPU and memory deltas from label_a to label_b.",
        json!({
            "type": "object",
            "properties": {
                "label_a": {"type": "string"},
                "label_b": {"type": "string"}
            },
            "required": ["label_a", "label_b"]
        }),
        compare_perf_checkpoints,
    ));
    registry.register(FnTool::new(
        "generate_perf_issue_report",
        "Write up the perf investigation as a Markdown issue, optionally saved to the issues \
         directory.",
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "baseline_label": {"type": "string"},
                "current_label": {"type": "string"},
                "selector": {"type": "string"},
                "persist": {"type": "boolean"}
            }
        }),
        generate_perf_issue_report,
    ));
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveArgs {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OperationArgs {
    pub operation: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListArgs {
    #[serde(default)]
    pub all_scripts: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoadArgs {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_apply_now")]
    pub apply_now: bool,
}

fn default_apply_now() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueArgs {
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PerfLabelArgs {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PerfCompareArgs {
    pub label_a: String,
    pub label_b: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportArgs {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub baseline_label: Option<String>,
    #[serde(default)]
    pub current_label: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub persist: bool,
}

fn save_checkpoint_state(ctx: &mut DebugContext, args: SaveArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let name = args.name.as_deref().unwrap_or("manual");
        Ok(ctx.save_state(Some(name), false, "manual").await)
    })
}

fn save_operation_checkpoint(ctx: &mut DebugContext, args: OperationArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let reason = format!("op:{}:before", args.operation.trim());
        Ok(ctx.save_state(None, true, &reason).await)
    })
}

fn list_checkpoint_states(ctx: &mut DebugContext, args: ListArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let script = (!args.all_scripts).then(|| ctx.script().to_string());
        let states = ctx.store().list_states(script.as_deref());
        Ok(json!({ "count": states.len(), "states": states }))
    })
}

fn load_checkpoint_state(ctx: &mut DebugContext, args: LoadArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let selector = args.selector.as_deref().unwrap_or("latest");
        Ok(ctx.load_checkpoint_state(selector, args.apply_now))
    })
}

fn queue_checkpoint_restore(ctx: &mut DebugContext, args: QueueArgs) -> ToolFuture<'_> {
    Box::pin(async move { Ok(ctx.queue_restore(args.selector.as_deref().unwrap_or("latest"))) })
}

fn create_perf_checkpoint(ctx: &mut DebugContext, args: PerfLabelArgs) -> ToolFuture<'_> {
    Box::pin(async move { ctx.create_perf_checkpoint(args.label.as_deref()).await })
}

fn list_perf_checkpoints(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let checkpoints = ctx.perf().checkpoints();
        Ok(json!({ "count": checkpoints.len(), "checkpoints": checkpoints }))
    })
}

fn compare_perf_checkpoints(ctx: &mut DebugContext, args: PerfCompareArgs) -> ToolFuture<'_> {
    Box::pin(async move { Ok(ctx.perf.compare(&args.label_a, &args.label_b)) })
}

fn generate_perf_issue_report(ctx: &mut DebugContext, args: ReportArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let request = IssueReportRequest {
            title: args.title,
            baseline_label: args.baseline_label,
            current_label: args.current_label,
            selector: args.selector,
            persist: args.persist,
        };
        let report_context = ctx.report_context();
        ctx.perf.issue_report(&request, &report_context)
    })
}
