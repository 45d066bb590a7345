//! Slash commands typed by the operator at the debug prompt.

use serde_json::{Value, json};
use sleuth_debugger::ExecutionAction;

use crate::context::{DebugContext, Phase};
use crate::prompts::render_source;
use crate::tools::execution::NOT_RUNNING;

pub const HELP: &str = "\
Commands:
  /help                 Show this help
  /locals               Local variables of the current frame
  /stack                Call stack
  /source [n]           Source around the current line (n lines of context)
  /step /next /return   Step into, over, or out of the current function
  /continue             Run to the next breakpoint
  /until <line>         Run until a line at or after <line>
  /break [spec]         Set a breakpoint (file:line [if cond]) or list breakpoints
  /delete <n>           Remove breakpoint number n
  /breakpoints          List breakpoints
  /watch <expr>         Watch an expression
  /unwatch <expr>       Stop watching an expression
  /watches              Show watched expressions
  /focus <file|@func>.. Only pause in these files or functions
  /unfocus              Pause anywhere
  /memory               Current and peak traced memory
  /snapshot [label]     Take a memory snapshot
  /perf [label]         Record a perf checkpoint
  /save [name]          Save a named checkpoint
  /states               List checkpoints for this script
  /restore [selector]   Restore a checkpoint (default: latest)
  /run                  Start the target (before the first run)
  /rerun                Restart the target
  /quit                 End the session
Anything else is sent to the model.";

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub text: String,
    pub is_error: bool,
    pub action: Option<ExecutionAction>,
}

impl CommandReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            action: None,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            action: None,
        }
    }

    fn action(action: ExecutionAction, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            action: Some(action),
        }
    }
}

/// Bare words that act without a slash.
fn bare_word(line: &str) -> Option<&'static str> {
    match line.to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => Some("/quit"),
        "rerun" | "restart" => Some("/rerun"),
        "run" => Some("/run"),
        _ => None,
    }
}

/// Handle `line` if it is a command. `None` means it is a prompt for the
/// model.
pub async fn run_command(ctx: &mut DebugContext, line: &str) -> Option<CommandReply> {
    let line = line.trim();
    let line = bare_word(line).unwrap_or(line);
    let rest = line.strip_prefix('/')?;
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };

    let reply = match cmd {
        "help" | "h" => CommandReply::text(HELP),
        "locals" => locals(ctx).await,
        "stack" | "bt" => stack(ctx),
        "source" | "list" => source(ctx, arg),
        "step" | "s" => resume(ctx, ExecutionAction::Step),
        "next" | "n" => resume(ctx, ExecutionAction::Next),
        "return" | "r" => resume(ctx, ExecutionAction::Return),
        "continue" | "c" => resume(ctx, ExecutionAction::Continue),
        "until" => match arg.parse::<u32>() {
            Ok(line) if line > 0 => resume(ctx, ExecutionAction::Until(line)),
            _ => CommandReply::error("Usage: /until <line>"),
        },
        "break" | "b" if arg.is_empty() => breakpoints(ctx),
        "break" | "b" => match ctx.set_breakpoint_spec(arg) {
            Ok(bp) => CommandReply::text(format!(
                "Breakpoint #{} at {}:{}{}",
                bp.number,
                bp.file,
                bp.line,
                bp.condition
                    .map(|c| format!(" if {c}"))
                    .unwrap_or_default()
            )),
            Err(e) => CommandReply::error(e.detail()),
        },
        "delete" => match arg.parse::<u32>() {
            Ok(number) => match ctx.control.breakpoints_mut().remove_by_number(number) {
                Ok(bp) => CommandReply::text(format!(
                    "Deleted breakpoint #{} at {}:{}",
                    bp.number, bp.file, bp.line
                )),
                Err(e) => CommandReply::error(e.detail()),
            },
            Err(_) => CommandReply::error("Usage: /delete <number>"),
        },
        "breakpoints" => breakpoints(ctx),
        "watch" if arg.is_empty() => CommandReply::error("Usage: /watch <expression>"),
        "watch" => {
            if ctx.watches.add(arg) {
                CommandReply::text(format!("Watching: {arg}"))
            } else {
                CommandReply::text(format!("Already watching: {arg}"))
            }
        }
        "unwatch" => {
            if ctx.watches.remove(arg) {
                CommandReply::text(format!("Removed watch: {arg}"))
            } else {
                CommandReply::error(format!("Not watching: {arg}"))
            }
        }
        "watches" => watches(ctx).await,
        "focus" => focus(ctx, arg),
        "unfocus" => {
            ctx.control.focus_mut().clear();
            CommandReply::text("Focus cleared; pausing anywhere.")
        }
        "memory" => json_reply(ctx.request("memory_current", json!({})).await),
        "snapshot" => snapshot(ctx, arg).await,
        "perf" => {
            let label = (!arg.is_empty()).then_some(arg);
            json_reply(ctx.create_perf_checkpoint(label).await)
        }
        "save" => {
            let name = if arg.is_empty() { "manual" } else { arg };
            value_reply(ctx.save_state(Some(name), false, "manual").await)
        }
        "states" => states(ctx),
        "restore" => {
            let selector = if arg.is_empty() { "latest" } else { arg };
            value_reply(ctx.load_checkpoint_state(selector, true))
        }
        "run" => match ctx.phase() {
            Phase::PreRun => CommandReply::action(ExecutionAction::Run, "Starting the target."),
            _ => CommandReply::error("The target has already been started; use /rerun."),
        },
        "rerun" | "restart" => match ctx.phase() {
            Phase::PreRun => CommandReply::action(ExecutionAction::Run, "Starting the target."),
            _ => CommandReply::action(ExecutionAction::Rerun, "Restarting the target."),
        },
        "quit" | "exit" | "q" => CommandReply::action(ExecutionAction::Quit, "Quitting."),
        other => CommandReply::error(format!(
            "Unknown command: /{other}. Type /help for available commands."
        )),
    };
    Some(reply)
}

fn resume(ctx: &DebugContext, action: ExecutionAction) -> CommandReply {
    if !ctx.is_paused() {
        return CommandReply::error(NOT_RUNNING);
    }
    let text = format!("Resuming ({}).", action.name());
    CommandReply::action(action, text)
}

async fn locals(ctx: &mut DebugContext) -> CommandReply {
    match ctx.request("locals", json!({})).await {
        Ok(Value::Object(locals)) if locals.is_empty() => CommandReply::text("(no locals)"),
        Ok(Value::Object(locals)) => {
            let lines: Vec<String> = locals
                .iter()
                .map(|(name, info)| {
                    format!(
                        "{name}: {} = {}",
                        info["type"].as_str().unwrap_or("?"),
                        info["repr"].as_str().unwrap_or("?")
                    )
                })
                .collect();
            CommandReply::text(lines.join("\n"))
        }
        Ok(other) => CommandReply::text(other.to_string()),
        Err(e) => CommandReply::error(e.detail()),
    }
}

fn stack(ctx: &DebugContext) -> CommandReply {
    if ctx.frames().is_empty() {
        return CommandReply::error("No active frame");
    }
    let lines: Vec<String> = ctx
        .frames()
        .frames()
        .iter()
        .map(|f| {
            let marker = if f.is_current { ">" } else { " " };
            format!("{marker} #{} {}", f.index, f.describe())
        })
        .collect();
    CommandReply::text(lines.join("\n"))
}

fn source(ctx: &DebugContext, arg: &str) -> CommandReply {
    let context = match arg {
        "" => ctx.config().debugger.source_context_lines as u32,
        n => match n.parse() {
            Ok(n) => n,
            Err(_) => return CommandReply::error("Usage: /source [context_lines]"),
        },
    };
    let (file, line) = match ctx.current_location() {
        Some(loc) => (loc.file, loc.line),
        None => (ctx.script().to_string(), 1),
    };
    match ctx.source.window_around(&file, line, context) {
        Ok(window) => CommandReply::text(format!(
            "{}\n{}",
            window.filename,
            render_source(&window, line)
        )),
        Err(e) => CommandReply::error(e.detail()),
    }
}

fn breakpoints(ctx: &DebugContext) -> CommandReply {
    let list = ctx.control().breakpoints().list();
    if list.is_empty() {
        return CommandReply::text("No breakpoints.");
    }
    let lines: Vec<String> = list
        .iter()
        .map(|bp| {
            let mut line = format!("#{} {}:{} hits={}", bp.number, bp.file, bp.line, bp.hits);
            if let Some(cond) = &bp.condition {
                line.push_str(&format!(" if {cond}"));
            }
            if !bp.enabled {
                line.push_str(" (disabled)");
            }
            if bp.temporary {
                line.push_str(" (temporary)");
            }
            line
        })
        .collect();
    CommandReply::text(lines.join("\n"))
}

async fn watches(ctx: &mut DebugContext) -> CommandReply {
    if ctx.watches().is_empty() {
        return CommandReply::text("No watch expressions.");
    }
    if !ctx.is_paused() {
        return CommandReply::text(ctx.watches().expressions().join("\n"));
    }
    let lines: Vec<String> = ctx
        .evaluate_watches()
        .await
        .into_iter()
        .map(|w| {
            let mark = if w.changed { " (changed)" } else { "" };
            format!("{} = {}{}", w.expression, w.current_value, mark)
        })
        .collect();
    CommandReply::text(lines.join("\n"))
}

fn focus(ctx: &mut DebugContext, arg: &str) -> CommandReply {
    let focus = ctx.control.focus_mut();
    for item in arg.split_whitespace() {
        match item.strip_prefix('@') {
            Some(function) if !function.is_empty() => focus.add_function(function),
            Some(_) => {}
            None => focus.add_file(item),
        }
    }
    if focus.is_empty() {
        return CommandReply::text("No focus set; pausing anywhere.");
    }
    CommandReply::text(format!(
        "Focus files: {}\nFocus functions: {}",
        display_list(&focus.files()),
        display_list(&focus.functions())
    ))
}

async fn snapshot(ctx: &mut DebugContext, arg: &str) -> CommandReply {
    let label = (!arg.is_empty()).then_some(arg);
    match ctx
        .request("memory_snapshot", json!({ "label": label }))
        .await
    {
        Ok(reply) => {
            if let Some(label) = reply.get("label").and_then(Value::as_str) {
                ctx.record_memory_label(label);
            }
            value_reply(reply)
        }
        Err(e) => CommandReply::error(e.detail()),
    }
}

fn states(ctx: &DebugContext) -> CommandReply {
    let states = ctx.store().list_states(Some(ctx.script()));
    if states.is_empty() {
        return CommandReply::text("No saved states for this script.");
    }
    let lines: Vec<String> = states
        .iter()
        .map(|s| {
            format!(
                "[{}] {} {} ({})\n    {}",
                s.kind,
                s.created_at,
                s.name.as_deref().unwrap_or("-"),
                s.reason,
                s.path
            )
        })
        .collect();
    CommandReply::text(lines.join("\n"))
}

fn display_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn json_reply(result: sleuth_common::Result<Value>) -> CommandReply {
    match result {
        Ok(value) => value_reply(value),
        Err(e) => CommandReply::error(e.detail()),
    }
}

/// Pretty-print a tool-style value; an `error` key makes it an error reply.
fn value_reply(value: Value) -> CommandReply {
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return CommandReply::error(error.to_string());
    }
    CommandReply::text(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
}
