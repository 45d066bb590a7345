pub mod commands;
pub mod context;
pub mod memory;
pub mod operator;
pub mod perf;
pub mod prompts;
pub mod runner;
pub mod session;
pub mod tools;

pub use commands::{CommandReply, HELP, run_command};
pub use context::{DebugContext, Phase, Stop};
pub use operator::{InputEvent, Notice, Operator, ScriptedOperator};
pub use perf::{IssueReportRequest, PerfSample, PerfTracker, ReportContext};
pub use runner::{RunOptions, build_agent, run_debugger};
pub use session::{DebugSession, RunOutcome};
pub use tools::{DebugTools, build_registry, tools_for_phase};
