use std::fmt;

use serde::{Deserialize, Serialize};
use sleuth_common::SourceLocation;
use tracing::{debug, instrument};

use crate::breakpoints::BreakpointTable;
use crate::evaluation::ExpressionEvaluator;
use crate::focus::FocusFilter;
use crate::target::Interest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebuggerState {
    Idle,
    Running,
    Paused,
    Completed,
    Quit,
    Crashed,
}

impl DebuggerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DebuggerState::Completed | DebuggerState::Quit | DebuggerState::Crashed
        )
    }
}

impl fmt::Display for DebuggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DebuggerState::Idle => "idle",
            DebuggerState::Running => "running",
            DebuggerState::Paused => "paused",
            DebuggerState::Completed => "completed",
            DebuggerState::Quit => "quit",
            DebuggerState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Line,
    Return,
    Exception,
    Break,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    #[serde(default)]
    pub traceback: String,
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// A candidate stop reported by the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub location: SourceLocation,
    /// Frames between this one and the script's module frame.
    pub depth: usize,
    pub exception: Option<ExceptionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Line,
    Breakpoint { number: u32 },
    Return,
    Exception,
    InjectedBreak,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Line => "line",
            StopReason::Breakpoint { .. } => "breakpoint",
            StopReason::Return => "return",
            StopReason::Exception => "exception",
            StopReason::InjectedBreak => "break",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Breakpoint { number } => write!(f, "breakpoint #{number}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Pending resume request, relative to the frame depth it was issued at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Next line anywhere, including deeper calls.
    Step,
    /// Next line at this depth or shallower.
    Next { depth: usize },
    /// This frame's return, or any line in a caller.
    Return { depth: usize },
    /// Breakpoints only.
    Continue,
    /// A line at or past `line` in this frame, or any line in a caller.
    Until { depth: usize, line: u32 },
}

impl ResumeMode {
    pub fn name(&self) -> &'static str {
        match self {
            ResumeMode::Step => "step",
            ResumeMode::Next { .. } => "next",
            ResumeMode::Return { .. } => "return",
            ResumeMode::Continue => "continue",
            ResumeMode::Until { .. } => "until",
        }
    }

    fn depth(&self) -> usize {
        match *self {
            ResumeMode::Next { depth }
            | ResumeMode::Return { depth }
            | ResumeMode::Until { depth, .. } => depth,
            ResumeMode::Step | ResumeMode::Continue => 0,
        }
    }

    pub fn stops_at_line(&self, depth: usize, line: u32) -> bool {
        match *self {
            ResumeMode::Step => true,
            ResumeMode::Continue => false,
            ResumeMode::Next { depth: d } => depth <= d,
            ResumeMode::Return { depth: d } => depth < d,
            ResumeMode::Until { depth: d, line: l } => depth < d || (depth == d && line >= l),
        }
    }

    pub fn stops_at_return(&self, depth: usize) -> bool {
        match *self {
            ResumeMode::Step => true,
            ResumeMode::Continue => false,
            ResumeMode::Next { depth: d }
            | ResumeMode::Return { depth: d }
            | ResumeMode::Until { depth: d, .. } => depth <= d,
        }
    }
}

/// What the operator or the model asked the paused session to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionAction {
    Step,
    Next,
    Return,
    Continue,
    Until(u32),
    Quit,
    Rerun,
    /// Start the target from the pre-run phase.
    Run,
}

impl ExecutionAction {
    pub fn is_resume(&self) -> bool {
        matches!(
            self,
            ExecutionAction::Step
                | ExecutionAction::Next
                | ExecutionAction::Return
                | ExecutionAction::Continue
                | ExecutionAction::Until(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionAction::Step => "step",
            ExecutionAction::Next => "next",
            ExecutionAction::Return => "return",
            ExecutionAction::Continue => "continue",
            ExecutionAction::Until(_) => "until",
            ExecutionAction::Quit => "quit",
            ExecutionAction::Rerun => "rerun",
            ExecutionAction::Run => "run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pause(StopReason),
    Resume,
}

/// Decides, for every reported event, whether the target pauses, and turns
/// resume actions into the pending [`ResumeMode`].
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    breakpoints: BreakpointTable,
    focus: FocusFilter,
    mode: ResumeMode,
    state: DebuggerState,
    break_on_exception: bool,
    skip_first_stop: bool,
    current: Option<TraceEvent>,
    stop_reason: Option<StopReason>,
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self {
            breakpoints: BreakpointTable::new(),
            focus: FocusFilter::new(),
            mode: ResumeMode::Step,
            state: DebuggerState::Idle,
            break_on_exception: true,
            skip_first_stop: false,
            current: None,
            stop_reason: None,
        }
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointTable {
        &mut self.breakpoints
    }

    pub fn focus(&self) -> &FocusFilter {
        &self.focus
    }

    pub fn focus_mut(&mut self) -> &mut FocusFilter {
        &mut self.focus
    }

    pub fn break_on_exception(&self) -> bool {
        self.break_on_exception
    }

    pub fn set_break_on_exception(&mut self, enabled: bool) {
        self.break_on_exception = enabled;
    }

    /// Make the first candidate stop of the run unobservable.
    pub fn set_skip_first_stop(&mut self, skip: bool) {
        self.skip_first_stop = skip;
    }

    pub fn skip_first_stop(&self) -> bool {
        self.skip_first_stop
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn mode(&self) -> ResumeMode {
        self.mode
    }

    pub fn current_event(&self) -> Option<&TraceEvent> {
        self.current.as_ref()
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Reset for a fresh run; the target starts single-stepping.
    pub fn begin_run(&mut self) {
        self.state = DebuggerState::Running;
        self.mode = ResumeMode::Step;
        self.current = None;
        self.stop_reason = None;
    }

    pub fn finish(&mut self, state: DebuggerState) {
        self.state = state;
        self.current = None;
    }

    /// Decide whether `event` pauses the target.
    ///
    /// Breakpoints at the event's line are counted even when stepping would
    /// stop there anyway. A candidate outside the focus filter resumes
    /// without touching the pending mode.
    #[instrument(skip(self, evaluator), fields(kind = ?event.kind, at = %event.location))]
    pub async fn on_event(
        &mut self,
        event: TraceEvent,
        evaluator: &mut dyn ExpressionEvaluator,
    ) -> Verdict {
        let reason = match event.kind {
            EventKind::Line => {
                let hit = self
                    .breakpoints
                    .check_hit(&event.location.file, event.location.line, evaluator)
                    .await;
                let stepping = self.mode.stops_at_line(event.depth, event.location.line);
                if !stepping && hit.is_none() {
                    return Verdict::Resume;
                }
                if self.skip_first_stop {
                    self.skip_first_stop = false;
                    self.mode = ResumeMode::Continue;
                    debug!("skipping first stop");
                    return Verdict::Resume;
                }
                if !self.in_focus(&event) {
                    return Verdict::Resume;
                }
                match hit {
                    Some(hit) => StopReason::Breakpoint { number: hit.number },
                    None => StopReason::Line,
                }
            }
            EventKind::Return => {
                if !self.mode.stops_at_return(event.depth) || !self.in_focus(&event) {
                    return Verdict::Resume;
                }
                StopReason::Return
            }
            EventKind::Exception => {
                if !self.break_on_exception {
                    return Verdict::Resume;
                }
                StopReason::Exception
            }
            EventKind::Break => {
                // The break stands in for the line event at this location.
                self.breakpoints
                    .check_hit(&event.location.file, event.location.line, evaluator)
                    .await;
                self.skip_first_stop = false;
                StopReason::InjectedBreak
            }
        };

        debug!("pausing: {}", reason);
        self.state = DebuggerState::Paused;
        self.current = Some(event);
        self.stop_reason = Some(reason.clone());
        Verdict::Pause(reason)
    }

    fn in_focus(&self, event: &TraceEvent) -> bool {
        self.focus
            .allows(&event.location.file, &event.location.function)
    }

    /// Apply a resume action relative to the paused frame. Returns `None` for
    /// actions that do not resume (quit, rerun, run).
    pub fn resume(&mut self, action: &ExecutionAction) -> Option<ResumeMode> {
        let (depth, _line) = self
            .current
            .as_ref()
            .map(|e| (e.depth, e.location.line))
            .unwrap_or((0, 0));
        let mode = match *action {
            ExecutionAction::Step => ResumeMode::Step,
            ExecutionAction::Next => ResumeMode::Next { depth },
            ExecutionAction::Return => ResumeMode::Return { depth },
            ExecutionAction::Continue => ResumeMode::Continue,
            ExecutionAction::Until(line) => ResumeMode::Until { depth, line },
            ExecutionAction::Quit | ExecutionAction::Rerun | ExecutionAction::Run => return None,
        };
        self.mode = mode;
        self.state = DebuggerState::Running;
        self.current = None;
        Some(mode)
    }

    /// The filter the target uses to skip events nobody will stop at.
    pub fn interest(&self) -> Interest {
        let (depth, line) = match self.mode {
            ResumeMode::Until { depth, line } => (depth, line),
            other => (other.depth(), 0),
        };
        Interest {
            mode: self.mode.name().to_string(),
            depth,
            line,
            breakpoints: self.breakpoints.enabled_lines(),
            exceptions: self.break_on_exception,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sleuth_common::Result;

    use super::*;
    use crate::evaluation::EvalOutcome;
    use crate::source::SourceProvider;

    struct Always;

    #[async_trait]
    impl ExpressionEvaluator for Always {
        async fn evaluate(&mut self, expression: &str, _: Option<usize>) -> Result<EvalOutcome> {
            Ok(EvalOutcome::failed(expression, "NotImplementedError", "unused"))
        }

        async fn check_condition(&mut self, _: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn line(file: &str, line: u32, function: &str, depth: usize) -> TraceEvent {
        TraceEvent {
            kind: EventKind::Line,
            location: SourceLocation::new(file, line, function),
            depth,
            exception: None,
        }
    }

    fn ret(file: &str, line: u32, depth: usize) -> TraceEvent {
        TraceEvent {
            kind: EventKind::Return,
            ..self::line(file, line, "f", depth)
        }
    }

    #[tokio::test]
    async fn skip_first_stop_is_one_shot_and_switches_to_continue() {
        let mut control = ExecutionControl::new();
        control.set_skip_first_stop(true);
        control.begin_run();
        let mut eval = Always;

        assert_eq!(
            control.on_event(line("/w/a.py", 1, "<module>", 0), &mut eval).await,
            Verdict::Resume
        );
        assert_eq!(control.mode(), ResumeMode::Continue);
        assert!(!control.skip_first_stop());
        assert_eq!(
            control.on_event(line("/w/a.py", 2, "<module>", 0), &mut eval).await,
            Verdict::Resume
        );
    }

    #[tokio::test]
    async fn next_treats_calls_as_atomic() {
        let mut control = ExecutionControl::new();
        control.begin_run();
        let mut eval = Always;
        assert!(matches!(
            control.on_event(line("/w/a.py", 5, "main", 1), &mut eval).await,
            Verdict::Pause(StopReason::Line)
        ));
        control.resume(&ExecutionAction::Next);

        assert_eq!(
            control.on_event(line("/w/a.py", 20, "helper", 2), &mut eval).await,
            Verdict::Resume
        );
        assert_eq!(control.on_event(ret("/w/a.py", 21, 2), &mut eval).await, Verdict::Resume);
        assert!(matches!(
            control.on_event(line("/w/a.py", 6, "main", 1), &mut eval).await,
            Verdict::Pause(_)
        ));
    }

    #[tokio::test]
    async fn return_stops_at_frame_exit() {
        let mut control = ExecutionControl::new();
        control.begin_run();
        let mut eval = Always;
        control.on_event(line("/w/a.py", 20, "helper", 2), &mut eval).await;
        control.resume(&ExecutionAction::Return);

        assert_eq!(
            control.on_event(line("/w/a.py", 21, "helper", 2), &mut eval).await,
            Verdict::Resume
        );
        assert_eq!(
            control.on_event(ret("/w/a.py", 22, 2), &mut eval).await,
            Verdict::Pause(StopReason::Return)
        );
    }

    #[tokio::test]
    async fn until_waits_for_a_later_line_in_the_same_frame() {
        let mut control = ExecutionControl::new();
        control.begin_run();
        let mut eval = Always;
        control.on_event(line("/w/a.py", 10, "loop", 1), &mut eval).await;
        control.resume(&ExecutionAction::Until(14));

        assert_eq!(
            control.on_event(line("/w/a.py", 11, "loop", 1), &mut eval).await,
            Verdict::Resume
        );
        assert_eq!(
            control.on_event(line("/w/a.py", 30, "inner", 2), &mut eval).await,
            Verdict::Resume
        );
        assert!(matches!(
            control.on_event(line("/w/a.py", 14, "loop", 1), &mut eval).await,
            Verdict::Pause(_)
        ));
        assert_eq!(control.interest().mode, "until");
        assert_eq!(control.interest().line, 14);
    }

    #[tokio::test]
    async fn unfocused_candidates_keep_the_pending_mode() {
        let mut control = ExecutionControl::new();
        control.focus_mut().set_files(["a.py"]);
        control.begin_run();
        let mut eval = Always;

        assert_eq!(
            control.on_event(line("/w/b.py", 1, "f", 0), &mut eval).await,
            Verdict::Resume
        );
        assert_eq!(control.mode(), ResumeMode::Step);
        assert!(matches!(
            control.on_event(line("/w/a.py", 3, "g", 1), &mut eval).await,
            Verdict::Pause(StopReason::Line)
        ));
    }

    #[tokio::test]
    async fn continue_stops_only_at_breakpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "x = 1\ny = 2\nz = 3\n").unwrap();
        let file = path.to_string_lossy().into_owned();

        let mut control = ExecutionControl::new();
        control
            .breakpoints_mut()
            .set(&SourceProvider::new(), &file, 2, None, false)
            .unwrap();
        control.begin_run();
        let mut eval = Always;
        control.on_event(line(&file, 1, "<module>", 0), &mut eval).await;
        control.resume(&ExecutionAction::Continue);

        let interest = control.interest();
        assert_eq!(interest.mode, "continue");
        assert_eq!(interest.breakpoints[&file], vec![2]);

        assert_eq!(
            control.on_event(line(&file, 2, "<module>", 0), &mut eval).await,
            Verdict::Pause(StopReason::Breakpoint { number: 1 })
        );
        control.resume(&ExecutionAction::Continue);
        assert_eq!(
            control.on_event(line(&file, 3, "<module>", 0), &mut eval).await,
            Verdict::Resume
        );
        assert_eq!(control.breakpoints().get(&file, 2).unwrap().hits, 1);
    }

    #[tokio::test]
    async fn injected_break_counts_a_breakpoint_on_the_same_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "x = 1\ny = 2\n").unwrap();
        let file = path.to_string_lossy().into_owned();

        let mut control = ExecutionControl::new();
        control
            .breakpoints_mut()
            .set(&SourceProvider::new(), &file, 2, None, false)
            .unwrap();
        control.begin_run();
        control.resume(&ExecutionAction::Continue);
        let mut eval = Always;
        let event = TraceEvent {
            kind: EventKind::Break,
            ..line(&file, 2, "<module>", 0)
        };
        assert_eq!(
            control.on_event(event, &mut eval).await,
            Verdict::Pause(StopReason::InjectedBreak)
        );
        assert_eq!(control.breakpoints().get(&file, 2).unwrap().hits, 1);
    }

    #[tokio::test]
    async fn exceptions_respect_the_toggle() {
        let mut control = ExecutionControl::new();
        control.begin_run();
        control.set_break_on_exception(false);
        let mut eval = Always;
        let event = TraceEvent {
            kind: EventKind::Exception,
            exception: Some(ExceptionInfo {
                type_name: "ZeroDivisionError".into(),
                message: "division by zero".into(),
                traceback: String::new(),
            }),
            ..line("/w/a.py", 4, "f", 1)
        };
        assert_eq!(control.on_event(event.clone(), &mut eval).await, Verdict::Resume);
        control.set_break_on_exception(true);
        assert_eq!(
            control.on_event(event, &mut eval).await,
            Verdict::Pause(StopReason::Exception)
        );
        assert_eq!(control.state(), DebuggerState::Paused);
    }
}
