//! Breakpoint, watch and focus tools.

use serde::Deserialize;
use serde_json::{Value, json};
use sleuth_agents::FnTool;
use sleuth_agents::tools::ToolFuture;
use sleuth_common::Error;
use sleuth_debugger::Breakpoint;
use sleuth_debugger::breakpoints::parse_spec;

use super::{DebugTools, NoArgs, empty_schema, refusal};
use crate::context::DebugContext;

pub fn register(registry: &mut DebugTools) {
    registry.register(FnTool::new(
        "set_breakpoint",
        "Set a breakpoint by line (file defaults to the current frame's file, then the \
         script) with an optional condition. A `spec` of the form `file:line [if cond]` may \
         be given instead.",
        json!({
            "type": "object",
            "properties": {
                "line": {"type": "integer"},
                "file": {"type": "string"},
                "condition": {"type": "string"},
                "temporary": {"type": "boolean"},
                "spec": {"type": "string"}
            }
        }),
        set_breakpoint,
    ));
    registry.register(FnTool::new(
        "remove_breakpoint",
        "Remove a breakpoint by number, or by file and line.",
        json!({
            "type": "object",
            "properties": {
                "number": {"type": "integer"},
                "file": {"type": "string"},
                "line": {"type": "integer"}
            }
        }),
        remove_breakpoint,
    ));
    registry.register(FnTool::new(
        "list_breakpoints",
        "All breakpoints with their conditions and hit counts.",
        empty_schema(),
        list_breakpoints,
    ));
    registry.register(FnTool::new(
        "add_watch",
        "Watch an expression; it is re-evaluated at every stop and changes are reported.",
        expression_schema(),
        add_watch,
    ));
    registry.register(FnTool::new(
        "remove_watch",
        "Stop watching an expression.",
        expression_schema(),
        remove_watch,
    ));
    registry.register(FnTool::new(
        "get_watches",
        "Watched expressions. While paused, each is evaluated and reported with its previous \
         value and a changed flag.",
        empty_schema(),
        get_watches,
    ));
    registry.register(FnTool::new(
        "set_focus",
        "Only pause in the given files and/or functions. Replaces the current focus for each \
         list that is given.",
        json!({
            "type": "object",
            "properties": {
                "files": {"type": "array", "items": {"type": "string"}},
                "functions": {"type": "array", "items": {"type": "string"}}
            }
        }),
        set_focus,
    ));
    registry.register(FnTool::new(
        "clear_focus",
        "Pause anywhere again.",
        empty_schema(),
        clear_focus,
    ));
}

fn expression_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"expression": {"type": "string"}},
        "required": ["expression"]
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SetBreakpointArgs {
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub spec: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveBreakpointArgs {
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WatchArgs {
    pub expression: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FocusArgs {
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub functions: Option<Vec<String>>,
}

pub(crate) fn breakpoint_json(bp: &Breakpoint) -> Value {
    json!({
        "number": bp.number,
        "file": bp.file,
        "line": bp.line,
        "enabled": bp.enabled,
        "temporary": bp.temporary,
        "condition": bp.condition,
        "hits": bp.hits,
        "ignore_count": bp.ignore_count,
    })
}

fn set_breakpoint(ctx: &mut DebugContext, args: SetBreakpointArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let default_file = ctx.default_file();
        let spec = match (args.spec, args.line) {
            (Some(spec), _) => parse_spec(&spec, Some(&default_file))?,
            (None, Some(line)) => {
                let file = args.file.unwrap_or_else(|| default_file.clone());
                let mut spec = parse_spec(&format!("{file}:{line}"), Some(&default_file))?;
                spec.condition = args.condition;
                spec
            }
            (None, None) => {
                return Err(Error::Validation(
                    "set_breakpoint needs either 'line' or 'spec'".into(),
                ));
            }
        };
        let bp = ctx.control.breakpoints_mut().set(
            &ctx.source,
            &spec.file,
            spec.line,
            spec.condition,
            args.temporary,
        )?;
        let mut out = breakpoint_json(&bp);
        out["status"] = json!("set");
        Ok(out)
    })
}

fn remove_breakpoint(ctx: &mut DebugContext, args: RemoveBreakpointArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let removed = match (args.number, args.line) {
            (Some(number), _) => ctx.control.breakpoints_mut().remove_by_number(number)?,
            (None, Some(line)) => {
                let file = args.file.unwrap_or_else(|| ctx.default_file());
                ctx.control.breakpoints_mut().remove_at(&file, line)?
            }
            (None, None) => return Ok(refusal("Give a breakpoint number or a line")),
        };
        Ok(json!({
            "status": "removed",
            "number": removed.number,
            "file": removed.file,
            "line": removed.line,
        }))
    })
}

fn list_breakpoints(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let breakpoints: Vec<Value> = ctx
            .control
            .breakpoints()
            .list()
            .iter()
            .map(breakpoint_json)
            .collect();
        Ok(json!({ "count": breakpoints.len(), "breakpoints": breakpoints }))
    })
}

fn add_watch(ctx: &mut DebugContext, args: WatchArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let expression = args.expression.trim();
        if expression.is_empty() {
            return Ok(refusal("Watch expression is empty"));
        }
        let status = if ctx.watches.add(expression) {
            "added"
        } else {
            "already_watched"
        };
        Ok(json!({ "status": status, "watches": ctx.watches.expressions() }))
    })
}

fn remove_watch(ctx: &mut DebugContext, args: WatchArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        if !ctx.watches.remove(args.expression.trim()) {
            return Ok(refusal(format!("Not watching: {}", args.expression)));
        }
        Ok(json!({ "status": "removed", "watches": ctx.watches.expressions() }))
    })
}

fn get_watches(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        if !ctx.is_paused() {
            return Ok(json!({ "watches": ctx.watches.expressions(), "evaluated": false }));
        }
        let results = ctx.evaluate_watches().await;
        Ok(json!({ "watches": results, "evaluated": true }))
    })
}

fn set_focus(ctx: &mut DebugContext, args: FocusArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let focus = ctx.control.focus_mut();
        if let Some(files) = args.files {
            focus.set_files(files);
        }
        if let Some(functions) = args.functions {
            focus.set_functions(functions);
        }
        Ok(json!({
            "status": "ok",
            "focus_files": focus.files(),
            "focus_functions": focus.functions(),
        }))
    })
}

fn clear_focus(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.control.focus_mut().clear();
        Ok(json!({ "status": "cleared" }))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sleuth_config::AppConfig;

    use super::*;
    use crate::tools::build_registry;

    fn context(dir: &tempfile::TempDir) -> DebugContext {
        let script = dir.path().join("app.py");
        fs::write(&script, "def f(x):\n    return x * 2\n\nprint(f(3))\n").unwrap();
        let mut config = AppConfig::default();
        config.state.dir = dir.path().join("state");
        DebugContext::new(config, &script, Vec::new()).unwrap()
    }

    async fn call(ctx: &mut DebugContext, name: &str, args: Value) -> Value {
        let registry = build_registry(8000);
        let out = registry.execute(ctx, name, args).await;
        serde_json::from_str(&out).unwrap()
    }

    #[tokio::test]
    async fn set_defaults_to_the_script_before_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        let out = call(&mut ctx, "set_breakpoint", json!({"line": 2, "condition": "x > 1"})).await;
        assert_eq!(out["status"], "set");
        assert_eq!(out["number"], 1);
        assert_eq!(out["file"], ctx.script());
        assert_eq!(out["condition"], "x > 1");

        let listed = call(&mut ctx, "list_breakpoints", json!({})).await;
        assert_eq!(listed["count"], 1);
    }

    #[tokio::test]
    async fn bad_lines_and_function_specs_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        let out = call(&mut ctx, "set_breakpoint", json!({"line": 99})).await;
        assert!(out["error"].as_str().unwrap().contains("does not exist"));

        let out = call(&mut ctx, "set_breakpoint", json!({"spec": "main"})).await;
        assert!(out["error"].as_str().unwrap().contains("not yet supported"));

        let out = call(&mut ctx, "remove_breakpoint", json!({"number": 7})).await;
        assert!(out.get("error").is_some());
    }

    #[tokio::test]
    async fn watches_are_unique_and_listed_without_a_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        call(&mut ctx, "add_watch", json!({"expression": "x"})).await;
        let again = call(&mut ctx, "add_watch", json!({"expression": "x"})).await;
        assert_eq!(again["status"], "already_watched");

        let out = call(&mut ctx, "get_watches", json!({})).await;
        assert_eq!(out["evaluated"], false);
        assert_eq!(out["watches"], json!(["x"]));
    }

    #[tokio::test]
    async fn focus_is_replaced_then_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        call(&mut ctx, "set_focus", json!({"functions": ["f"]})).await;
        assert_eq!(ctx.control().focus().functions(), vec!["f".to_string()]);
        call(&mut ctx, "clear_focus", json!({})).await;
        assert!(ctx.control().focus().is_empty());
    }
}
