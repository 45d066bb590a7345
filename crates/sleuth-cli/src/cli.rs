use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "sleuth", version)]
#[command(about = "AI-assisted Python debugger with checkpoint/restore.")]
pub(crate) struct Cli {
    /// Python script to debug.
    #[arg(value_name = "SCRIPT")]
    pub(crate) script: Option<PathBuf>,

    /// Arguments passed to the script.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) args: Vec<String>,

    /// Breakpoint before the first run (`LINE`, `FILE:LINE`, optionally `... if COND`).
    #[arg(short = 'b', long = "break", value_name = "SPEC")]
    pub(crate) breakpoints: Vec<String>,

    /// Insert a hard break into the target's source at FILE:LINE.
    #[arg(long = "inject-break", value_name = "FILE:LINE")]
    pub(crate) inject_breaks: Vec<String>,

    /// Only pause in these files.
    #[arg(long = "focus", value_name = "FILE")]
    pub(crate) focus_files: Vec<String>,

    /// Only pause in these functions.
    #[arg(long = "focus-function", value_name = "NAME")]
    pub(crate) focus_functions: Vec<String>,

    /// Pause on the first line of the script.
    #[arg(long)]
    pub(crate) break_on_entry: bool,

    /// Let uncaught exceptions end the run without a post-mortem stop.
    #[arg(long)]
    pub(crate) no_break_on_exception: bool,

    /// Start tracemalloc in the target for memory tools.
    #[arg(long)]
    pub(crate) trace_memory: bool,

    #[arg(long, value_name = "MODEL")]
    pub(crate) model: Option<String>,

    /// Restore a checkpoint before the first run (`latest`, a path or a save name).
    #[arg(long, value_name = "SELECTOR")]
    pub(crate) restore: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub(crate) state_dir: Option<PathBuf>,

    /// Steer every request toward the perf-checkpoint workflow.
    #[arg(long)]
    pub(crate) perf: bool,

    /// Set breakpoints and watches before the target starts.
    #[arg(long)]
    pub(crate) pre_run: bool,

    /// Config file to use instead of the `.sleuth/config.toml` search.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    pub(crate) log_file: Option<PathBuf>,

    #[arg(long)]
    pub(crate) log_json: bool,
}
