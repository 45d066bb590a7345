//! Frame inspection tools. All of them need a paused target.

use serde::Deserialize;
use serde_json::json;
use sleuth_agents::FnTool;
use sleuth_agents::tools::ToolFuture;
use sleuth_debugger::ExpressionEvaluator;

use super::{DebugTools, NoArgs, empty_schema};
use crate::context::DebugContext;
use crate::prompts::render_source;

pub fn register(registry: &mut DebugTools) {
    registry.register(FnTool::new(
        "inspect_variable",
        "Inspect one variable in the paused frame: type, repr, length and where it was found \
         (local, global or builtin).",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Variable name"},
                "frame_index": {"type": "integer", "description": "Stack frame index (0 = outermost); defaults to the current frame"},
                "max_depth": {"type": "integer", "description": "Nesting depth for the repr (default 3)"}
            },
            "required": ["name"]
        }),
        inspect_variable,
    ));
    registry.register(FnTool::new(
        "get_all_locals",
        "All local variables of a frame with their types and short reprs.",
        frame_schema(),
        get_all_locals,
    ));
    registry.register(FnTool::new(
        "get_closure_vars",
        "Free variables captured by the frame's closure.",
        frame_schema(),
        get_closure_vars,
    ));
    registry.register(FnTool::new(
        "evaluate_expression",
        "Evaluate a Python expression (or run a statement) in the paused frame. Returns the \
         repr and type, or the raised error. Captured stdout and stderr are included.",
        json!({
            "type": "object",
            "properties": {
                "expression": {"type": "string"},
                "frame_index": {"type": "integer", "description": "Stack frame index (0 = outermost); defaults to the current frame"}
            },
            "required": ["expression"]
        }),
        evaluate_expression,
    ));
    registry.register(FnTool::new(
        "get_source_context",
        "Source lines around the current stop, or around a given file and line.",
        json!({
            "type": "object",
            "properties": {
                "file": {"type": "string"},
                "line": {"type": "integer"},
                "context_lines": {"type": "integer", "description": "Lines before and after (default from config)"}
            }
        }),
        get_source_context,
    ));
    registry.register(FnTool::new(
        "get_call_stack",
        "The call stack at the current pause, outermost frame first.",
        empty_schema(),
        get_call_stack,
    ));
}

fn frame_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "frame_index": {"type": "integer", "description": "Stack frame index (0 = outermost); defaults to the current frame"}
        }
    })
}

#[derive(Debug, Deserialize)]
pub struct InspectArgs {
    pub name: String,
    #[serde(default)]
    pub frame_index: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameArgs {
    #[serde(default)]
    pub frame_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateArgs {
    pub expression: String,
    #[serde(default)]
    pub frame_index: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceContextArgs {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub context_lines: Option<u32>,
}

fn inspect_variable(ctx: &mut DebugContext, args: InspectArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.frames.resolve(args.frame_index)?;
        ctx.request(
            "variable",
            json!({
                "name": args.name,
                "frame_index": args.frame_index,
                "max_depth": args.max_depth.unwrap_or(3),
            }),
        )
        .await
    })
}

fn get_all_locals(ctx: &mut DebugContext, args: FrameArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.frames.resolve(args.frame_index)?;
        ctx.request("locals", json!({ "frame_index": args.frame_index }))
            .await
    })
}

fn get_closure_vars(ctx: &mut DebugContext, args: FrameArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.frames.resolve(args.frame_index)?;
        ctx.request("closure", json!({ "frame_index": args.frame_index }))
            .await
    })
}

fn evaluate_expression(ctx: &mut DebugContext, args: EvaluateArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.frames.resolve(args.frame_index)?;
        let outcome = ctx
            .paused_target()?
            .evaluate(&args.expression, args.frame_index)
            .await?;
        Ok(outcome.to_json())
    })
}

fn get_source_context(ctx: &mut DebugContext, args: SourceContextArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let location = ctx.current_location();
        let file = args
            .file
            .or_else(|| location.as_ref().map(|l| l.file.clone()))
            .unwrap_or_else(|| ctx.script().to_string());
        let line = args
            .line
            .or_else(|| location.as_ref().map(|l| l.line))
            .unwrap_or(1);
        let context = args
            .context_lines
            .unwrap_or(ctx.config.debugger.source_context_lines as u32);

        let window = ctx.source.window_around(&file, line, context)?;
        Ok(json!({
            "filename": window.filename,
            "current_line": line,
            "start_line": window.start_line,
            "end_line": window.end_line,
            "total_lines": window.total_lines,
            "source": render_source(&window, line),
        }))
    })
}

fn get_call_stack(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.frames.resolve(None)?;
        let frames = ctx.frames.frames();
        Ok(json!({
            "depth": frames.len(),
            "frames": frames,
        }))
    })
}
