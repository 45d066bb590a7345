//! The rerun loop. Each run of the target gets a fresh context and agent;
//! breakpoints, watches and the conversation summary carry over through
//! checkpoints.

use std::path::PathBuf;
use std::sync::Arc;

use sleuth_agents::{AgentRuntime, ConversationStore, LlmProvider, RuntimeLimits};
use sleuth_common::Result;
use sleuth_config::AppConfig;
use tracing::info;

use crate::context::DebugContext;
use crate::operator::{Notice, Operator};
use crate::session::{DebugSession, RunOutcome, report_restore};

/// What the command line asked for.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub script: PathBuf,
    pub args: Vec<String>,
    /// Breakpoint specs applied before the first run.
    pub breakpoints: Vec<String>,
    /// `file:line` specs injected as hard breaks into the target.
    pub inject_breaks: Vec<String>,
    pub focus_files: Vec<String>,
    pub focus_functions: Vec<String>,
    /// Checkpoint selector restored before the first run.
    pub restore: Option<String>,
    pub pre_run: bool,
}

/// A model runtime configured from `config`.
pub fn build_agent(config: &AppConfig, provider: Arc<dyn LlmProvider>) -> AgentRuntime {
    let mut agent = AgentRuntime::new(provider, config.llm.model.clone())
        .with_limits(RuntimeLimits {
            max_tool_rounds: config.agent.max_tool_rounds,
            loop_guard_threshold: config.agent.loop_guard_threshold,
            guarded_tools: config.agent.guarded_tools.clone(),
        })
        .with_conversation(ConversationStore::new(
            config.agent.max_conversation_messages,
            config.agent.max_tool_result_length,
        ));
    agent.set_max_tokens(config.llm.max_tokens);
    agent.set_temperature(config.llm.temperature);
    agent.set_max_retries(config.llm.max_retries);
    agent
}

/// Debug `options.script` until the operator quits.
///
/// The first run restores `options.restore` if given. Later runs restore
/// whatever the previous run queued, falling back to the latest checkpoint.
pub async fn run_debugger(
    config: &AppConfig,
    options: &RunOptions,
    provider: Arc<dyn LlmProvider>,
    operator: &mut dyn Operator,
) -> Result<()> {
    let mut run = 0usize;
    let mut carried: Option<String> = None;

    loop {
        run += 1;
        let first = run == 1;
        let mut ctx = DebugContext::new(config.clone(), &options.script, options.args.clone())?;
        ctx.set_inject_specs(options.inject_breaks.clone());

        let selector = if first {
            options.restore.clone()
        } else {
            Some(carried.take().unwrap_or_else(|| "latest".to_string()))
        };
        if let Some(selector) = selector {
            let report = ctx.load_state(&selector);
            report_restore(operator, &report, first);
        }

        if first {
            apply_initial_setup(&mut ctx, options, operator);
        }

        info!(run, script = %ctx.script(), "starting debug session");
        let agent = build_agent(config, provider.clone());
        let mut session = DebugSession::new(ctx, agent, &mut *operator);
        let outcome = session.run(first && options.pre_run).await?;
        carried = session.context_mut().take_queued_restore();
        drop(session);

        match outcome {
            RunOutcome::Quit => {
                operator.show(Notice::Info("Goodbye.".into()));
                return Ok(());
            }
            RunOutcome::Rerun => {
                operator.show(Notice::Info(format!("Restarting {}...", options.script.display())));
            }
        }
    }
}

fn apply_initial_setup(ctx: &mut DebugContext, options: &RunOptions, operator: &mut dyn Operator) {
    for spec in &options.breakpoints {
        match ctx.set_breakpoint_spec(spec) {
            Ok(bp) => operator.show(Notice::Info(format!(
                "Breakpoint {} at {}:{}",
                bp.number, bp.file, bp.line
            ))),
            Err(e) => operator.show(Notice::Error(format!(
                "Warning: Could not set breakpoint {spec}: {}",
                e.detail()
            ))),
        }
    }

    let focus = ctx.control.focus_mut();
    for file in &options.focus_files {
        focus.add_file(file);
    }
    for function in &options.focus_functions {
        focus.add_function(function.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn initial_breakpoints_report_failures() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.py");
        fs::write(&script, "a = 1\nb = 2\n").unwrap();
        let mut config = AppConfig::default();
        config.state.dir = dir.path().join("state");
        let mut ctx = DebugContext::new(config, &script, Vec::new()).unwrap();
        let options = RunOptions {
            script: script.clone(),
            breakpoints: vec!["2".into(), "40".into()],
            focus_functions: vec!["main".into()],
            ..RunOptions::default()
        };
        let mut operator = crate::operator::ScriptedOperator::default();

        apply_initial_setup(&mut ctx, &options, &mut operator);

        assert_eq!(ctx.control().breakpoints().len(), 1);
        let messages = operator.messages();
        assert!(messages[1].starts_with("Warning: Could not set breakpoint 40:"));
        assert!(!ctx.control().focus().is_empty());
    }
}
