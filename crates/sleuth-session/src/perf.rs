//! Perf checkpoints: labelled wall/CPU/memory samples and their comparison.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use sleuth_common::{Error, Result, SourceLocation};
use sleuth_state::models::now_iso;
use sleuth_state::{PerfCheckpoint, PerfSummary};
use tracing::info;

/// Measurements taken from the paused target for a new checkpoint.
#[derive(Debug, Clone, Default)]
pub struct PerfSample {
    pub process_time_ns: u64,
    pub python_current_bytes: Option<u64>,
    pub python_peak_bytes: Option<u64>,
    pub location: Option<SourceLocation>,
}

impl PerfSample {
    /// Parse the agent's `perf_sample` reply.
    pub fn from_reply(reply: &Value, location: Option<SourceLocation>) -> Self {
        Self {
            process_time_ns: reply
                .get("process_time_ns")
                .and_then(Value::as_u64)
                .unwrap_or_default(),
            python_current_bytes: reply.get("traced_current").and_then(Value::as_u64),
            python_peak_bytes: reply.get("traced_peak").and_then(Value::as_u64),
            location,
        }
    }
}

/// Debugger facts quoted in an issue report.
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub script_path: String,
    pub breakpoint_count: usize,
    pub focus_files: Vec<String>,
    pub focus_functions: Vec<String>,
    pub issues_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct IssueReportRequest {
    pub title: Option<String>,
    pub baseline_label: Option<String>,
    pub current_label: Option<String>,
    pub selector: Option<String>,
    pub persist: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PerfTracker {
    checkpoints: Vec<PerfCheckpoint>,
    last_comparison: Option<Value>,
}

impl PerfTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_summary(&self) -> PerfSummary {
        PerfSummary {
            checkpoints: self.checkpoints.clone(),
            last_comparison: self.last_comparison.clone(),
        }
    }

    /// Replace everything with a restored summary.
    pub fn restore(&mut self, summary: PerfSummary) {
        self.checkpoints = summary.checkpoints;
        self.last_comparison = summary.last_comparison;
    }

    pub fn checkpoints(&self) -> &[PerfCheckpoint] {
        &self.checkpoints
    }

    pub fn last_comparison(&self) -> Option<&Value> {
        self.last_comparison.as_ref()
    }

    pub fn find(&self, label: &str) -> Option<&PerfCheckpoint> {
        self.checkpoints.iter().find(|c| c.label == label)
    }

    /// Record a checkpoint now. Without a label it becomes `perf_<n>`.
    pub fn record(&mut self, label: Option<&str>, sample: PerfSample) -> Result<PerfCheckpoint> {
        let label = match label.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => l.to_string(),
            None => format!("perf_{}", self.checkpoints.len() + 1),
        };
        if self.find(&label).is_some() {
            return Err(Error::Validation(format!(
                "Perf checkpoint already exists: {label}"
            )));
        }

        let (stop_file, stop_line, stop_function) = match sample.location {
            Some(loc) => (Some(loc.file), Some(loc.line), Some(loc.function)),
            None => (None, None, None),
        };
        let checkpoint = PerfCheckpoint {
            label,
            created_at: now_iso(),
            wall_time_ns: monotonic_ns(),
            process_time_ns: sample.process_time_ns,
            stop_file,
            stop_line,
            stop_function,
            python_current_bytes: sample.python_current_bytes,
            python_peak_bytes: sample.python_peak_bytes,
        };
        info!("perf checkpoint {} recorded", checkpoint.label);
        self.checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Deltas from `label_a` to `label_b`. Remembered as the last comparison.
    pub fn compare(&mut self, label_a: &str, label_b: &str) -> Value {
        let Some(a) = self.find(label_a) else {
            return json!({ "error": format!("Perf checkpoint not found: {label_a}") });
        };
        let Some(b) = self.find(label_b) else {
            return json!({ "error": format!("Perf checkpoint not found: {label_b}") });
        };

        let wall_delta_ns = signed_delta(a.wall_time_ns, b.wall_time_ns);
        let process_delta_ns = signed_delta(a.process_time_ns, b.process_time_ns);
        let memory_delta = |x: Option<u64>, y: Option<u64>| match (x, y) {
            (Some(x), Some(y)) => Some(signed_delta(x, y)),
            _ => None,
        };

        let result = json!({
            "label_a": a.label,
            "label_b": b.label,
            "wall_delta_ns": wall_delta_ns,
            "wall_delta_ms": wall_delta_ns as f64 / 1_000_000.0,
            "process_delta_ns": process_delta_ns,
            "process_delta_ms": process_delta_ns as f64 / 1_000_000.0,
            "memory_current_delta_bytes": memory_delta(a.python_current_bytes, b.python_current_bytes),
            "memory_peak_delta_bytes": memory_delta(a.python_peak_bytes, b.python_peak_bytes),
            "checkpoint_a": a,
            "checkpoint_b": b,
        });
        self.last_comparison = Some(result.clone());
        result
    }

    /// Markdown write-up of the current perf investigation.
    ///
    /// Compares the requested labels, else reuses the last comparison, else
    /// compares the two newest checkpoints.
    pub fn issue_report(
        &mut self,
        request: &IssueReportRequest,
        context: &ReportContext,
    ) -> Result<Value> {
        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Performance regression investigation".to_string());

        let comparison = match (&request.baseline_label, &request.current_label) {
            (Some(a), Some(b)) => {
                let result = self.compare(a, b);
                if result.get("error").is_some() {
                    return Ok(result);
                }
                Some(result)
            }
            _ => {
                let n = self.checkpoints.len();
                if let Some(last) = self.last_comparison.clone() {
                    Some(last)
                } else if n >= 2 {
                    let older = self.checkpoints[n - 2].label.clone();
                    let newer = self.checkpoints[n - 1].label.clone();
                    Some(self.compare(&older, &newer))
                } else {
                    None
                }
            }
        };

        let selector = request
            .selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("latest");
        let script = if context.script_path.is_empty() {
            "<script>"
        } else {
            context.script_path.as_str()
        };

        let mut lines = vec![
            format!("# {title}"),
            String::new(),
            "## Symptom".to_string(),
            "- Potential performance issue under investigation.".to_string(),
            String::new(),
            "## Reproduction".to_string(),
            format!("- Script: `{script}`"),
            format!("- Restore command: `sleuth {script} --restore {selector}`"),
            String::new(),
            "## Checkpoint Comparison".to_string(),
        ];
        match &comparison {
            Some(c) => {
                let field = |key: &str| match c.get(key) {
                    None | Some(Value::Null) => "None".to_string(),
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                };
                lines.push(format!("- Baseline: `{}`", field("label_a")));
                lines.push(format!("- Current: `{}`", field("label_b")));
                lines.push(format!("- Wall delta: `{} ms`", field("wall_delta_ms")));
                lines.push(format!("- CPU process delta: `{} ms`", field("process_delta_ms")));
                lines.push(format!(
                    "- Python current memory delta: `{} bytes`",
                    field("memory_current_delta_bytes")
                ));
                lines.push(format!(
                    "- Python peak memory delta: `{} bytes`",
                    field("memory_peak_delta_bytes")
                ));
            }
            None => lines.push("- No perf checkpoint comparison available yet.".to_string()),
        }
        lines.extend([
            String::new(),
            "## Debugger Context".to_string(),
            format!("- Breakpoints: `{}`", context.breakpoint_count),
            format!("- Focus files: `{}`", join_or_none(&context.focus_files)),
            format!("- Focus functions: `{}`", join_or_none(&context.focus_functions)),
            String::new(),
            "## Next Verification Steps".to_string(),
            "- Restore baseline checkpoint state if needed.".to_string(),
            "- Rerun and collect fresh perf checkpoints around target code path.".to_string(),
            "- Compare wall/CPU/memory deltas to confirm regression direction.".to_string(),
            String::new(),
        ]);
        let report = lines.join("\n");

        let mut output = json!({ "title": title, "report": report });
        if request.persist {
            let path = persist_report(&context.issues_dir, &report)?;
            output["path"] = json!(path.to_string_lossy());
        }
        Ok(output)
    }
}

fn persist_report(dir: &Path, report: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = Utc::now().format("perf_%Y%m%dT%H%M%S%6fZ.md").to_string();
    let path = dir.join(name);
    fs::write(&path, report)?;
    info!("perf issue report written to {}", path.display());
    Ok(path)
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Nanoseconds on a process-wide monotonic clock. Only differences between
/// checkpoints taken by the same process are meaningful.
fn monotonic_ns() -> u64 {
    static ANCHOR: LazyLock<Instant> = LazyLock::new(Instant::now);
    u64::try_from(ANCHOR.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

fn signed_delta(a: u64, b: u64) -> i64 {
    (b as i128 - a as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
