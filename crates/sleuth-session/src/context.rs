//! Everything a debug tool can touch during one run of the target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use sleuth_common::{Error, Result, SourceLocation};
use sleuth_config::AppConfig;
use sleuth_debugger::breakpoints::parse_spec;
use sleuth_common::paths::absolute_string;
use sleuth_debugger::source::REMAP_RADIUS;
use sleuth_debugger::{
    Breakpoint, ExecutionAction, ExecutionControl, FrameSnapshot, LaunchOptions, PythonTarget,
    SourceProvider, StopReason, TargetEvent, TargetExit, TraceEvent, Verdict, WatchManager,
    WatchResult, resolve_injected_break_lines,
};
use sleuth_state::{
    AgentSummary, BreakpointState, DebuggerSection, MemorySummary, RuntimeSummary, StateEnvelope,
    StateKind, StateMeta, StateStore,
};
use tracing::{debug, info, instrument, warn};

use crate::memory::analyze_leaks;
use crate::perf::{PerfSample, PerfTracker, ReportContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The target has not been started.
    PreRun,
    Live,
    /// The target has exited; the session stays up until quit or rerun.
    PostRun,
}

/// How [`DebugContext::next_stop`] came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stop {
    Paused(StopReason),
    Exited(TargetExit),
}

pub struct DebugContext {
    pub(crate) config: AppConfig,
    pub(crate) control: ExecutionControl,
    pub(crate) watches: WatchManager,
    pub(crate) source: SourceProvider,
    pub(crate) target: Option<PythonTarget>,
    pub(crate) frames: FrameSnapshot,
    pub(crate) perf: PerfTracker,
    store: StateStore,
    phase: Phase,
    script: String,
    script_args: Vec<String>,
    inject_specs: Vec<String>,
    pending_action: Option<ExecutionAction>,
    queued_restore: Option<String>,
    post_run_reason: Option<String>,
    python_version: String,
    memory_labels: Vec<String>,
    conversation_digest: Value,
    restored_summary: Option<Value>,
}

impl DebugContext {
    pub fn new(config: AppConfig, script: impl AsRef<Path>, script_args: Vec<String>) -> Result<Self> {
        let store = StateStore::open(&config.state.dir, config.state.max_auto_states_per_script)?;
        let mut control = ExecutionControl::new();
        control.set_break_on_exception(config.debugger.break_on_exception);
        control.set_skip_first_stop(!config.debugger.break_on_entry);

        Ok(Self {
            config,
            control,
            watches: WatchManager::new(),
            source: SourceProvider::new(),
            target: None,
            frames: FrameSnapshot::default(),
            perf: PerfTracker::new(),
            store,
            phase: Phase::PreRun,
            script: absolute_string(script.as_ref()),
            script_args,
            inject_specs: Vec::new(),
            pending_action: None,
            queued_restore: None,
            post_run_reason: None,
            python_version: String::new(),
            memory_labels: Vec::new(),
            conversation_digest: json!({}),
            restored_summary: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn script_args(&self) -> &[String] {
        &self.script_args
    }

    pub fn control(&self) -> &ExecutionControl {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ExecutionControl {
        &mut self.control
    }

    pub fn watches(&self) -> &WatchManager {
        &self.watches
    }

    pub fn perf(&self) -> &PerfTracker {
        &self.perf
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn frames(&self) -> &FrameSnapshot {
        &self.frames
    }

    pub fn post_run_reason(&self) -> Option<&str> {
        self.post_run_reason.as_deref()
    }

    /// `FILE:LINE` specs for compile-time breaks in the entry script.
    pub fn set_inject_specs(&mut self, specs: Vec<String>) {
        self.inject_specs = specs;
    }

    /// The target is stopped and its frames can be inspected.
    pub fn is_paused(&self) -> bool {
        self.phase == Phase::Live && self.target.as_ref().is_some_and(|t| t.is_paused())
    }

    pub fn can_apply_restore_now(&self) -> bool {
        self.is_paused() || self.phase == Phase::PostRun
    }

    pub fn current_event(&self) -> Option<&TraceEvent> {
        if self.is_paused() {
            self.control.current_event()
        } else {
            None
        }
    }

    pub fn current_location(&self) -> Option<SourceLocation> {
        self.current_event().map(|e| e.location.clone())
    }

    /// File a tool should use when none is given: the paused frame's file,
    /// else the entry script.
    pub fn default_file(&self) -> String {
        self.current_location()
            .map(|l| l.file)
            .unwrap_or_else(|| self.script.clone())
    }

    // -----------------------------------------------------------------------
    // Execution actions and queued restores
    // -----------------------------------------------------------------------

    /// Record what should happen once the current interaction ends.
    pub fn request_action(&mut self, action: ExecutionAction) {
        debug!("execution action requested: {}", action.name());
        self.pending_action = Some(action);
    }

    pub fn take_pending_action(&mut self) -> Option<ExecutionAction> {
        self.pending_action.take()
    }

    pub fn queue_restore(&mut self, selector: &str) -> Value {
        let selector = match selector.trim() {
            "" => "latest",
            s => s,
        };
        self.queued_restore = Some(selector.to_string());
        json!({
            "status": "queued",
            "selector": selector,
            "message": format!("Queued restore selector '{selector}' for the next rerun."),
        })
    }

    pub fn take_queued_restore(&mut self) -> Option<String> {
        self.queued_restore.take()
    }

    /// Load now when possible, otherwise queue for the next run.
    pub fn load_checkpoint_state(&mut self, selector: &str, apply_now: bool) -> Value {
        if !apply_now {
            return self.queue_restore(selector);
        }
        if self.can_apply_restore_now() {
            return self.load_state(selector);
        }
        let mut queued = self.queue_restore(selector);
        queued["message"] = json!(
            "Restore queued for the next run because runtime is not paused and post-run context is unavailable."
        );
        queued
    }

    // -----------------------------------------------------------------------
    // Conversation hand-off
    // -----------------------------------------------------------------------

    pub fn set_conversation_digest(&mut self, digest: Value) {
        self.conversation_digest = digest;
    }

    /// Digest restored from a checkpoint, to be handed to the model once.
    pub fn take_restored_summary(&mut self) -> Option<Value> {
        self.restored_summary.take()
    }

    // -----------------------------------------------------------------------
    // Target lifecycle
    // -----------------------------------------------------------------------

    /// Launch the target. Returns diagnostics for rejected break injections.
    #[instrument(skip(self), fields(script = %self.script))]
    pub async fn start_target(&mut self) -> Result<Vec<String>> {
        let plan = resolve_injected_break_lines(Path::new(&self.script), &self.inject_specs);
        for message in &plan.diagnostics {
            warn!("{}", message);
        }

        let mut options = LaunchOptions::new(PathBuf::from(&self.script));
        options.python = self.config.debugger.python.clone();
        options.args = self.script_args.clone();
        options.injected_lines = plan.lines;
        options.trace_memory = self.config.debugger.trace_memory;
        options.eval_output_limit = self.config.debugger.eval_output_limit;

        self.control.begin_run();
        let target = PythonTarget::launch(&options, &self.control.interest()).await?;
        info!(
            "target started (pid {}, python {})",
            target.pid(),
            target.python_version()
        );
        self.python_version = target.python_version().to_string();
        self.target = Some(target);
        self.memory_labels.clear();
        self.frames.clear();
        self.phase = Phase::Live;
        Ok(plan.diagnostics)
    }

    /// Run the target until something pauses it or it exits.
    pub async fn next_stop(&mut self) -> Result<Stop> {
        loop {
            let Some(target) = self.target.as_mut() else {
                return Err(Error::Target("Target is not running".into()));
            };
            match target.next_event().await? {
                TargetEvent::Trace(event) => match self.control.on_event(event, target).await {
                    Verdict::Pause(reason) => {
                        self.frames = match target.stack().await {
                            Ok(frames) => frames,
                            Err(e) => {
                                warn!("could not read the stack: {}", e.detail());
                                FrameSnapshot::default()
                            }
                        };
                        return Ok(Stop::Paused(reason));
                    }
                    Verdict::Resume => target.resume(&self.control.interest()).await?,
                },
                TargetEvent::Exited(exit) => {
                    self.control.finish(exit.final_state());
                    self.frames.clear();
                    return Ok(Stop::Exited(exit));
                }
            }
        }
    }

    /// Apply a resume action to the paused target.
    pub async fn resume(&mut self, action: &ExecutionAction) -> Result<()> {
        if self.control.resume(action).is_none() {
            return Err(Error::Debugger(format!(
                "'{}' does not resume execution",
                action.name()
            )));
        }
        self.frames.clear();
        let interest = self.control.interest();
        match self.target.as_mut() {
            Some(target) => target.resume(&interest).await,
            None => Err(Error::Target("Target is not running".into())),
        }
    }

    /// Ask a live target to quit.
    pub async fn stop_target(&mut self) -> Option<TargetExit> {
        let target = self.target.as_mut()?;
        let exit = target.quit().await;
        self.control.finish(exit.final_state());
        self.frames.clear();
        Some(exit)
    }

    pub fn enter_post_run(&mut self, reason: &str) {
        self.phase = Phase::PostRun;
        self.post_run_reason = Some(reason.to_string());
        self.target = None;
        self.frames.clear();
    }

    // -----------------------------------------------------------------------
    // Paused-target access
    // -----------------------------------------------------------------------

    pub fn paused_target(&mut self) -> Result<&mut PythonTarget> {
        if self.phase != Phase::Live {
            return Err(Error::Debugger(
                "No active frame (target is not running)".into(),
            ));
        }
        self.target
            .as_mut()
            .filter(|t| t.is_paused())
            .ok_or_else(|| Error::Debugger("No active frame".into()))
    }

    /// One agent operation against the paused target.
    pub async fn request(&mut self, op: &str, params: Value) -> Result<Value> {
        self.paused_target()?.request(op, params).await
    }

    pub async fn evaluate_watches(&mut self) -> Vec<WatchResult> {
        if !self.is_paused() {
            return Vec::new();
        }
        match self.target.as_mut() {
            Some(target) => self.watches.evaluate_all(target, None).await,
            None => Vec::new(),
        }
    }

    /// Parse `file:line [if cond]` and set it, resolving bare line numbers
    /// against the default file.
    pub fn set_breakpoint_spec(&mut self, spec: &str) -> Result<Breakpoint> {
        let default_file = self.default_file();
        let parsed = parse_spec(spec, Some(&default_file))?;
        self.control
            .breakpoints_mut()
            .set(&self.source, &parsed.file, parsed.line, parsed.condition, false)
    }

    pub fn record_memory_label(&mut self, label: &str) {
        if !self.memory_labels.iter().any(|l| l == label) {
            self.memory_labels.push(label.to_string());
        }
    }

    pub fn memory_labels(&self) -> &[String] {
        &self.memory_labels
    }

    /// Leak heuristics over gc state and the first and last snapshots.
    pub async fn detect_leaks(&mut self) -> Result<Value> {
        let gc = self.request("gc_stats", json!({ "top_n_types": 10 })).await?;
        let bounds = (
            self.memory_labels.first().cloned(),
            self.memory_labels.last().cloned(),
        );
        let comparison = match bounds {
            (Some(first), Some(last)) if self.memory_labels.len() >= 2 => {
                let params = json!({ "label_a": first, "label_b": last, "top_n": 20 });
                match self.request("memory_compare", params).await {
                    Ok(diff) => Some(diff),
                    Err(e) => {
                        warn!("snapshot comparison failed: {}", e.detail());
                        None
                    }
                }
            }
            _ => None,
        };
        Ok(analyze_leaks(
            Some(&gc),
            comparison.as_ref(),
            self.memory_labels.len(),
        ))
    }

    // -----------------------------------------------------------------------
    // Perf checkpoints
    // -----------------------------------------------------------------------

    pub async fn create_perf_checkpoint(&mut self, label: Option<&str>) -> Result<Value> {
        let location = self.current_location();
        let reply = self.request("perf_sample", json!({})).await?;
        let checkpoint = self
            .perf
            .record(label, PerfSample::from_reply(&reply, location))?;
        Ok(serde_json::to_value(checkpoint)?)
    }

    pub fn report_context(&self) -> ReportContext {
        let focus = self.control.focus();
        ReportContext {
            script_path: self.script.clone(),
            breakpoint_count: self.control.breakpoints().len(),
            focus_files: focus.files(),
            focus_functions: focus.functions(),
            issues_dir: self.config.state.issues_dir.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Checkpoint state
    // -----------------------------------------------------------------------

    /// Snapshot debugger, runtime, memory, conversation and perf state.
    pub async fn capture_state(&mut self, reason: &str) -> StateEnvelope {
        let meta = StateMeta::capture(
            &self.script,
            &self.script_args,
            &self.config.llm.model,
            &self.python_version,
        );
        let mut state = StateEnvelope::new(StateKind::Auto, reason, meta);
        state.debugger = self.debugger_section();
        state.runtime = self.runtime_summary(reason).await;
        state.memory = self.memory_summary().await;
        state.agent = AgentSummary {
            conversation_summary: self.conversation_digest.clone(),
        };
        state.perf = self.perf.to_summary();
        state
    }

    fn debugger_section(&self) -> DebuggerSection {
        let focus = self.control.focus();
        DebuggerSection {
            breakpoints: self
                .control
                .breakpoints()
                .list()
                .into_iter()
                .map(|bp| BreakpointState {
                    context_snippet: self
                        .source
                        .line_text(&bp.file, bp.line)
                        .map(|t| t.trim().to_string())
                        .or(bp.snippet)
                        .unwrap_or_default(),
                    file: bp.file,
                    line: bp.line,
                    condition: bp.condition,
                    enabled: bp.enabled,
                    temporary: bp.temporary,
                    hits: bp.hits,
                    ignore_count: bp.ignore_count,
                })
                .collect(),
            watches: self.watches.expressions(),
            focus_files: focus.files(),
            focus_functions: focus.functions(),
        }
    }

    async fn runtime_summary(&mut self, reason: &str) -> RuntimeSummary {
        let mut summary = RuntimeSummary {
            stop_reason: reason.to_string(),
            ..RuntimeSummary::default()
        };
        let Some(location) = self.current_location() else {
            return summary;
        };
        summary.stop_file = Some(location.file);
        summary.stop_line = Some(location.line);
        summary.stop_function = Some(location.function);
        summary.stack = self
            .frames
            .frames()
            .iter()
            .filter_map(|f| serde_json::to_value(f).ok())
            .collect();

        match self.request("locals", json!({})).await {
            Ok(Value::Object(locals)) => {
                for (name, info) in locals {
                    let mut entry = BTreeMap::new();
                    for key in ["type", "repr"] {
                        if let Some(text) = info.get(key).and_then(Value::as_str) {
                            entry.insert(key.to_string(), text.to_string());
                        }
                    }
                    summary.locals_summary.insert(name, entry);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("locals unavailable for checkpoint: {}", e.detail()),
        }
        summary
    }

    async fn memory_summary(&mut self) -> MemorySummary {
        let mut summary = MemorySummary {
            python_snapshot_labels: self.memory_labels.clone(),
            ..MemorySummary::default()
        };
        if !self.is_paused() {
            return summary;
        }
        if let Ok(current) = self.request("memory_current", json!({})).await
            && current.get("error").is_none()
        {
            let text = |key: &str| current.get(key).and_then(Value::as_str).map(str::to_string);
            summary.python_current_human = text("current_human");
            summary.python_peak_human = text("peak_human");
        }
        if self.memory_labels.len() >= 2 {
            summary.leak_summary = self.detect_leaks().await.ok();
        }
        summary
    }

    /// Save a checkpoint. Auto-saves are pruned per script afterwards and
    /// report `disabled` when auto-saving is off.
    pub async fn save_state(&mut self, name: Option<&str>, auto: bool, reason: &str) -> Value {
        if auto && !self.config.state.auto_save {
            return json!({ "status": "disabled" });
        }
        let state = self.capture_state(reason).await;
        let saved = if auto {
            self.store.save_auto(&state).inspect(|_| {
                self.store.prune_auto(&self.script, None);
            })
        } else {
            self.store.save_manual(name.unwrap_or("manual"), state)
        };
        match saved {
            Ok(path) => json!({ "status": "ok", "path": path.to_string_lossy() }),
            Err(e) => {
                warn!("state save failed: {}", e);
                json!({ "error": e.to_payload_message() })
            }
        }
    }

    /// Load a checkpoint for this script and apply it.
    pub fn load_state(&mut self, selector: &str) -> Value {
        let loaded = match self
            .store
            .load(selector, &self.script, Some(&self.config.llm.model))
        {
            Ok(loaded) => loaded,
            Err(e) => return json!({ "error": e.to_payload_message() }),
        };

        let applied = self.apply_debugger_section(&loaded.state.debugger, loaded.code_drift);
        let summary = &loaded.state.agent.conversation_summary;
        if summary.as_object().is_some_and(|o| !o.is_empty()) {
            self.restored_summary = Some(summary.clone());
        }
        self.perf.restore(loaded.state.perf.clone());
        if !loaded.state.meta.script_args.is_empty() {
            self.script_args = loaded.state.meta.script_args.clone();
        }

        let mut warnings = loaded.warnings.clone();
        warnings.extend(
            applied["warnings"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|w| w.as_str().map(str::to_string)),
        );
        info!("restored state from {}", loaded.path.display());
        json!({
            "status": "ok",
            "path": loaded.path.to_string_lossy(),
            "warnings": warnings,
            "applied": applied,
        })
    }

    /// Replace breakpoints, watches and focus with a saved section. Under
    /// code drift each breakpoint is relocated by its snippet or dropped.
    pub fn apply_debugger_section(&mut self, section: &DebuggerSection, code_drift: bool) -> Value {
        self.control.breakpoints_mut().clear();
        self.watches.clear();
        self.control.focus_mut().clear();

        for expression in &section.watches {
            self.watches.add(expression);
        }
        self.control.focus_mut().set_files(section.focus_files.iter());
        self.control
            .focus_mut()
            .set_functions(section.focus_functions.iter());

        let mut warnings = Vec::new();
        let mut applied = 0;
        let mut skipped = 0;
        for saved in &section.breakpoints {
            let line = if code_drift {
                match self.source.remap_line_by_snippet(
                    &saved.file,
                    saved.line,
                    &saved.context_snippet,
                    REMAP_RADIUS,
                ) {
                    Some(line) => line,
                    None => {
                        skipped += 1;
                        warnings.push(format!(
                            "Could not remap breakpoint {}:{}; skipped.",
                            saved.file, saved.line
                        ));
                        continue;
                    }
                }
            } else {
                saved.line
            };
            if line != saved.line {
                info!(
                    "breakpoint {}:{} remapped to line {}",
                    saved.file, saved.line, line
                );
            }
            self.control.breakpoints_mut().restore(Breakpoint {
                number: 0,
                file: saved.file.clone(),
                line,
                enabled: saved.enabled,
                temporary: saved.temporary,
                condition: saved.condition.clone(),
                hits: saved.hits,
                ignore_count: saved.ignore_count,
                snippet: (!saved.context_snippet.is_empty()).then(|| saved.context_snippet.clone()),
            });
            applied += 1;
        }

        json!({
            "applied_breakpoints": applied,
            "skipped_breakpoints": skipped,
            "applied_watches": self.watches.expressions().len(),
            "warnings": warnings,
        })
    }
}
