//! Execution-control tools. They only record the requested action; the
//! session applies it once the model's turn is over.

use serde::Deserialize;
use serde_json::{Value, json};
use sleuth_agents::FnTool;
use sleuth_agents::tools::ToolFuture;
use sleuth_debugger::ExecutionAction;

use super::{DebugTools, NoArgs, empty_schema, refusal};
use crate::context::{DebugContext, Phase};

pub const NOT_RUNNING: &str = "Execution controls are unavailable: target is not running.";

pub fn register(registry: &mut DebugTools) {
    registry.register(FnTool::new(
        "step_into",
        "Resume and pause at the next executed line, entering called functions.",
        empty_schema(),
        step_into,
    ));
    registry.register(FnTool::new(
        "step_over",
        "Resume and pause at the next line of the current function.",
        empty_schema(),
        step_over,
    ));
    registry.register(FnTool::new(
        "step_out",
        "Resume until the current function is about to return.",
        empty_schema(),
        step_out,
    ));
    registry.register(FnTool::new(
        "continue_execution",
        "Resume until the next breakpoint, exception or the end of the program.",
        empty_schema(),
        continue_execution,
    ));
    registry.register(FnTool::new(
        "until_line",
        "Resume until a line at or after `line` is reached in the current function.",
        json!({
            "type": "object",
            "properties": {"line": {"type": "integer"}},
            "required": ["line"]
        }),
        until_line,
    ));
    registry.register(FnTool::new(
        "run_target",
        "Start the target program with the breakpoints, watches and focus set so far.",
        empty_schema(),
        run_target,
    ));
    registry.register(FnTool::new(
        "rerun_target",
        "Restart the target program from the beginning. Breakpoints and watches carry over \
         through the latest checkpoint.",
        empty_schema(),
        rerun_target,
    ));
}

#[derive(Debug, Deserialize)]
pub struct UntilArgs {
    pub line: u32,
}

fn resume(ctx: &mut DebugContext, action: ExecutionAction, message: &str) -> Value {
    if !ctx.is_paused() {
        return refusal(NOT_RUNNING);
    }
    let name = action.name();
    ctx.request_action(action);
    json!({ "status": "ok", "action": name, "message": message })
}

fn step_into(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        Ok(resume(
            ctx,
            ExecutionAction::Step,
            "Stepping into the next line once this turn ends.",
        ))
    })
}

fn step_over(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        Ok(resume(
            ctx,
            ExecutionAction::Next,
            "Stepping over to the next line once this turn ends.",
        ))
    })
}

fn step_out(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        Ok(resume(
            ctx,
            ExecutionAction::Return,
            "Running to the end of the current function once this turn ends.",
        ))
    })
}

fn continue_execution(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        Ok(resume(
            ctx,
            ExecutionAction::Continue,
            "Continuing to the next breakpoint once this turn ends.",
        ))
    })
}

fn until_line(ctx: &mut DebugContext, args: UntilArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        if args.line == 0 {
            return Ok(refusal("Line numbers start at 1"));
        }
        let message = format!("Running until line {} once this turn ends.", args.line);
        Ok(resume(ctx, ExecutionAction::Until(args.line), &message))
    })
}

fn run_target(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        if ctx.phase() != Phase::PreRun {
            return Ok(refusal("The target has already been started; use rerun_target."));
        }
        ctx.request_action(ExecutionAction::Run);
        Ok(json!({
            "status": "ok",
            "action": "run",
            "message": "The target starts once this turn ends.",
        }))
    })
}

fn rerun_target(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        if ctx.phase() == Phase::PreRun {
            ctx.request_action(ExecutionAction::Run);
            return Ok(json!({
                "status": "ok",
                "action": "run",
                "message": "The target has not run yet; it starts once this turn ends.",
            }));
        }
        ctx.request_action(ExecutionAction::Rerun);
        Ok(json!({
            "status": "ok",
            "action": "rerun",
            "message": "The target restarts from the beginning once this turn ends.",
        }))
    })
}
