//! One run of the target: pre-run setup, the stop → interact → resume loop,
//! and the post-run phase.

use serde_json::Value;
use sleuth_agents::{AgentRuntime, BoundTools, ToolHost, TurnOutcome};
use sleuth_common::Result;
use sleuth_debugger::{ExecutionAction, StopReason, TargetExit};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::run_command;
use crate::context::{DebugContext, Phase, Stop};
use crate::operator::{InputEvent, Notice, Operator};
use crate::prompts::{
    BASE_SYSTEM_PROMPT, PromptSituation, StopContext, augment_user_prompt, build_stop_context,
    post_run_prompt, pre_run_prompt, render_source,
};
use crate::tools::execution::NOT_RUNNING;
use crate::tools::{DebugTools, build_registry, tools_for_phase};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Quit,
    /// Start the target again in a fresh session.
    Rerun,
}

pub struct DebugSession<'o> {
    ctx: DebugContext,
    agent: AgentRuntime,
    registry: DebugTools,
    operator: &'o mut dyn Operator,
    tool_calls: mpsc::UnboundedReceiver<String>,
    interrupts: u8,
}

impl<'o> DebugSession<'o> {
    pub fn new(ctx: DebugContext, mut agent: AgentRuntime, operator: &'o mut dyn Operator) -> Self {
        let registry = build_registry(ctx.config().agent.max_tool_result_length);
        let (tx, tool_calls) = mpsc::unbounded_channel();
        agent.set_tool_call_observer(Some(Box::new(move |name: &str, args: &Value| {
            let _ = tx.send(format!("{name}({args})"));
        })));
        Self {
            ctx,
            agent,
            registry,
            operator,
            tool_calls,
            interrupts: 0,
        }
    }

    pub fn context(&self) -> &DebugContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DebugContext {
        &mut self.ctx
    }

    pub fn into_context(self) -> DebugContext {
        self.ctx
    }

    /// Drive the session to its end. With `pre_run`, the operator and the
    /// model can prepare breakpoints before the target starts.
    pub async fn run(&mut self, pre_run: bool) -> Result<RunOutcome> {
        if pre_run {
            self.agent
                .set_system_prompt(pre_run_prompt(self.ctx.script()));
            self.operator.show(Notice::Info(format!(
                "Pre-run mode for {}. Set breakpoints, then /run (or ask the model to start).",
                self.ctx.script()
            )));
            match self.interact().await? {
                ExecutionAction::Quit => return Ok(RunOutcome::Quit),
                _ => debug!("leaving pre-run"),
            }
        }

        self.start().await?;

        loop {
            match self.ctx.next_stop().await? {
                Stop::Paused(reason) => {
                    let action = self.handle_stop(&reason).await?;
                    match action {
                        ExecutionAction::Quit => {
                            self.ctx.save_state(None, true, "quit").await;
                            self.ctx.stop_target().await;
                            return Ok(RunOutcome::Quit);
                        }
                        ExecutionAction::Rerun => {
                            self.ctx.save_state(None, true, "rerun").await;
                            self.ctx.stop_target().await;
                            return Ok(RunOutcome::Rerun);
                        }
                        ExecutionAction::Run => self.ctx.resume(&ExecutionAction::Continue).await?,
                        action => self.ctx.resume(&action).await?,
                    }
                }
                Stop::Exited(exit) => return self.post_run(exit).await,
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(selector) = self.ctx.take_queued_restore() {
            let report = self.ctx.load_state(&selector);
            report_restore(self.operator, &report, true);
        }

        let diagnostics = self.ctx.start_target().await?;
        for message in diagnostics {
            self.operator.show(Notice::Error(message));
        }
        if let Some(summary) = self.ctx.take_restored_summary() {
            self.agent.set_restored_summary(Some(summary));
        }
        self.agent.set_system_prompt(BASE_SYSTEM_PROMPT);
        info!("debugging {}", self.ctx.script());
        Ok(())
    }

    async fn handle_stop(&mut self, reason: &StopReason) -> Result<ExecutionAction> {
        let watches = self.ctx.evaluate_watches().await;
        let Some(event) = self.ctx.current_event().cloned() else {
            warn!("paused without a current event");
            return Ok(ExecutionAction::Continue);
        };
        let location = event.location.clone();
        let context_lines = self.ctx.config().debugger.source_context_lines as u32;
        let window = self
            .ctx
            .source
            .window_around(&location.file, location.line, context_lines)
            .ok();

        self.operator.show(Notice::Stop {
            location: location.clone(),
            reason: reason.to_string(),
            exception: event.exception.as_ref().map(ToString::to_string),
            source: window.as_ref().map(|w| render_source(w, location.line)),
        });
        for watch in watches.iter().filter(|w| w.changed) {
            self.operator.show(Notice::WatchChanged {
                expression: watch.expression.clone(),
                previous: watch.previous_value.clone(),
                current: watch.current_value.clone(),
            });
        }

        self.agent.set_system_prompt(build_stop_context(&StopContext {
            reason: &reason.to_string(),
            location: &location,
            exception: event.exception.as_ref(),
            source: window.as_ref(),
            watches: &watches,
        }));
        self.ctx
            .save_state(None, true, &format!("stop:{}", reason.as_str()))
            .await;

        self.interact().await
    }

    async fn post_run(&mut self, exit: TargetExit) -> Result<RunOutcome> {
        self.operator.show(Notice::Info(exit.summary()));
        if let Some(traceback) = &exit.traceback {
            self.operator.show(Notice::Error(traceback.clone()));
        }
        let reason = exit.stop_reason();
        self.ctx.enter_post_run(reason);
        self.ctx
            .save_state(None, true, &format!("post_run:{reason}"))
            .await;

        self.agent.set_system_prompt(format!(
            "{BASE_SYSTEM_PROMPT}\n{}",
            post_run_prompt(self.ctx.script())
        ));
        self.operator.show(Notice::Info(
            "The program has ended. Ask about the run, edit files, /rerun, or /quit.".into(),
        ));

        match self.interact().await? {
            ExecutionAction::Rerun | ExecutionAction::Run => {
                self.ctx.save_state(None, true, "post_run_rerun").await;
                Ok(RunOutcome::Rerun)
            }
            _ => {
                self.ctx.save_state(None, true, "post_run_quit").await;
                Ok(RunOutcome::Quit)
            }
        }
    }

    /// Read input until something chooses an action valid for the phase.
    async fn interact(&mut self) -> Result<ExecutionAction> {
        loop {
            let prompt = match self.ctx.phase() {
                Phase::PreRun => "(sleuth pre-run) ",
                Phase::Live => "(sleuth) ",
                Phase::PostRun => "(sleuth post-run) ",
            };
            let line = match self.operator.read_line(prompt).await {
                InputEvent::Line(line) => {
                    self.interrupts = 0;
                    line
                }
                InputEvent::Eof if !self.operator.is_interactive() => {
                    return Ok(ExecutionAction::Quit);
                }
                InputEvent::Interrupt | InputEvent::Eof => {
                    self.interrupts += 1;
                    if self.interrupts >= 2 {
                        return Ok(ExecutionAction::Quit);
                    }
                    self.operator
                        .show(Notice::Info("Interrupted. Press Ctrl-C again to quit.".into()));
                    continue;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(reply) = run_command(&mut self.ctx, line).await {
                self.operator.show(if reply.is_error {
                    Notice::Error(reply.text)
                } else {
                    Notice::Output(reply.text)
                });
                if let Some(action) = reply.action
                    && self.accepts(&action)
                {
                    return Ok(action);
                }
                continue;
            }

            self.ask_model(line).await;
            if let Some(action) = self.ctx.take_pending_action() {
                if self.accepts(&action) {
                    return Ok(action);
                }
                self.operator.show(Notice::Error(NOT_RUNNING.into()));
            }
        }
    }

    fn accepts(&self, action: &ExecutionAction) -> bool {
        match self.ctx.phase() {
            Phase::PreRun => !action.is_resume() && *action != ExecutionAction::Rerun,
            Phase::Live => true,
            Phase::PostRun => !action.is_resume(),
        }
    }

    /// One model turn, streamed to the operator. Failures are shown, never
    /// propagated.
    async fn ask_model(&mut self, input: &str) {
        let script = self.ctx.script().to_string();
        let phase = self.ctx.phase();
        let situation = PromptSituation {
            perf_mode: self.ctx.config().perf_mode,
            paused: self.ctx.is_paused(),
            can_restore: self.ctx.can_apply_restore_now(),
            post_run_script: (phase == Phase::PostRun).then_some(script.as_str()),
        };
        let message = augment_user_prompt(input, &situation);
        if let Some(summary) = self.ctx.take_restored_summary() {
            self.agent.set_restored_summary(Some(summary));
        }

        let outcome = {
            let names = tools_for_phase(&self.registry, phase);
            let mut bound = BoundTools::new(&self.registry, &mut self.ctx).restricted(&names);
            let host: &mut dyn ToolHost = &mut bound;
            let (delta_tx, mut delta_rx) = mpsc::channel::<String>(64);
            let operator = &mut *self.operator;
            let tool_calls = &mut self.tool_calls;

            let turn = self
                .agent
                .send_message_streaming(&message, Some(host), delta_tx);
            let relay = async {
                loop {
                    tokio::select! {
                        delta = delta_rx.recv() => match delta {
                            Some(text) => operator.show(Notice::ModelDelta(text)),
                            None => break,
                        },
                        Some(call) = tool_calls.recv() => operator.show(Notice::ToolCall(call)),
                    }
                }
                while let Ok(call) = tool_calls.try_recv() {
                    operator.show(Notice::ToolCall(call));
                }
            };
            let (outcome, ()) = tokio::join!(turn, relay);
            outcome
        };

        match outcome {
            Ok(outcome) => {
                if let TurnOutcome::RoundLimitExceeded { rounds } = &outcome {
                    warn!("model turn hit the round cap ({rounds})");
                }
                self.operator.show(Notice::ModelReply(outcome.text()));
            }
            Err(e) => {
                warn!("model turn failed: {}", e);
                self.operator
                    .show(Notice::Error(format!("Model request failed: {}", e.detail())));
            }
        }

        match serde_json::to_value(self.agent.conversation_digest()) {
            Ok(digest) => self.ctx.set_conversation_digest(digest),
            Err(e) => debug!("conversation digest not serialisable: {}", e),
        }
    }
}

/// Show the outcome of a checkpoint load. Failures of an implicit restore
/// are informational.
pub(crate) fn report_restore(operator: &mut dyn Operator, report: &Value, explicit: bool) {
    if let Some(error) = report.get("error").and_then(Value::as_str) {
        let text = format!("No checkpoint restored: {error}");
        operator.show(if explicit {
            Notice::Error(text)
        } else {
            Notice::Info(text)
        });
        return;
    }
    if let Some(path) = report.get("path").and_then(Value::as_str) {
        let applied = &report["applied"];
        operator.show(Notice::Info(format!(
            "Restored state from {path} ({} breakpoints, {} watches)",
            applied["applied_breakpoints"].as_u64().unwrap_or(0),
            applied["applied_watches"].as_u64().unwrap_or(0)
        )));
    }
    for warning in report["warnings"].as_array().into_iter().flatten() {
        if let Some(text) = warning.as_str() {
            operator.show(Notice::Info(format!("Warning: {text}")));
        }
    }
}
