pub mod breakpoints;
pub mod control;
pub mod evaluation;
pub mod focus;
pub mod frames;
pub mod inject;
pub mod source;
pub mod target;
pub mod watches;

pub use breakpoints::{Breakpoint, BreakpointHit, BreakpointSpec, BreakpointTable};
pub use control::{
    DebuggerState, EventKind, ExceptionInfo, ExecutionAction, ExecutionControl, ResumeMode,
    StopReason, TraceEvent, Verdict,
};
pub use evaluation::{EvalOutcome, ExpressionEvaluator};
pub use focus::FocusFilter;
pub use frames::{FrameRecord, FrameSnapshot};
pub use inject::{InjectionPlan, LineShift, inject_breaks, resolve_injected_break_lines};
pub use source::SourceProvider;
pub use target::{ExitStatus, Interest, LaunchOptions, PythonTarget, TargetEvent, TargetExit};
pub use watches::{WatchManager, WatchResult};
