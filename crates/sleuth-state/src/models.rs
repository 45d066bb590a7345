//! The persisted checkpoint envelope.
//!
//! Every section defaults when absent so payloads written by older schema
//! versions still load.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Auto,
    #[default]
    Manual,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateKind::Auto => "auto",
            StateKind::Manual => "manual",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMeta {
    pub schema_version: u32,
    pub created_at: String,
    pub tool_version: String,
    pub interpreter_version: String,
    pub cwd: String,
    pub script_path: String,
    pub script_args: Vec<String>,
    pub model: String,
    pub script_hash: String,
}

impl StateMeta {
    /// Metadata for a checkpoint of `script_path` taken now.
    pub fn capture(
        script_path: &str,
        script_args: &[String],
        model: &str,
        interpreter_version: &str,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now_iso(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            interpreter_version: interpreter_version.to_string(),
            cwd: std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            script_path: script_path.to_string(),
            script_args: script_args.to_vec(),
            model: model.to_string(),
            script_hash: crate::store::script_hash(Path::new(script_path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointState {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub enabled: bool,
    pub temporary: bool,
    pub hits: u32,
    pub ignore_count: u32,
    /// Stripped source text of the line at capture time.
    pub context_snippet: String,
}

impl Default for BreakpointState {
    fn default() -> Self {
        Self {
            file: String::new(),
            line: 0,
            condition: None,
            enabled: true,
            temporary: false,
            hits: 0,
            ignore_count: 0,
            context_snippet: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerSection {
    pub breakpoints: Vec<BreakpointState>,
    pub watches: Vec<String>,
    pub focus_files: Vec<String>,
    pub focus_functions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSummary {
    pub stop_reason: String,
    pub stop_file: Option<String>,
    pub stop_line: Option<u32>,
    pub stop_function: Option<String>,
    pub stack: Vec<Value>,
    /// Variable name to `{type, repr}` for the innermost frame.
    pub locals_summary: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for RuntimeSummary {
    fn default() -> Self {
        Self {
            stop_reason: "unknown".to_string(),
            stop_file: None,
            stop_line: None,
            stop_function: None,
            stack: Vec::new(),
            locals_summary: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySummary {
    pub python_current_human: Option<String>,
    pub python_peak_human: Option<String>,
    pub python_snapshot_labels: Vec<String>,
    pub cuda_snapshot_labels: Vec<String>,
    pub leak_summary: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSummary {
    pub conversation_summary: Value,
}

impl Default for AgentSummary {
    fn default() -> Self {
        Self {
            conversation_summary: Value::Object(Default::default()),
        }
    }
}

/// A labelled timing sample. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfCheckpoint {
    pub label: String,
    pub created_at: String,
    pub wall_time_ns: u64,
    pub process_time_ns: u64,
    pub stop_file: Option<String>,
    pub stop_line: Option<u32>,
    pub stop_function: Option<String>,
    pub python_current_bytes: Option<u64>,
    pub python_peak_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfSummary {
    pub checkpoints: Vec<PerfCheckpoint>,
    pub last_comparison: Option<Value>,
}

/// One persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    #[serde(default)]
    pub kind: StateKind,
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default)]
    pub name: Option<String>,
    pub meta: StateMeta,
    #[serde(default)]
    pub debugger: DebuggerSection,
    #[serde(default)]
    pub runtime: RuntimeSummary,
    #[serde(default)]
    pub memory: MemorySummary,
    #[serde(default)]
    pub agent: AgentSummary,
    #[serde(default)]
    pub perf: PerfSummary,
}

fn default_reason() -> String {
    "unknown".to_string()
}

impl StateEnvelope {
    pub fn new(kind: StateKind, reason: impl Into<String>, meta: StateMeta) -> Self {
        Self {
            kind,
            reason: reason.into(),
            name: None,
            meta,
            debugger: DebuggerSection::default(),
            runtime: RuntimeSummary::default(),
            memory: MemorySummary::default(),
            agent: AgentSummary::default(),
            perf: PerfSummary::default(),
        }
    }
}

/// UTC timestamp with fixed microsecond precision, so values sort as text.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn legacy_payload_defaults_missing_sections() {
        let legacy = json!({
            "kind": "auto",
            "reason": "stop:line",
            "meta": {
                "schema_version": 1,
                "created_at": "2025-01-01T00:00:00.000000Z",
                "script_path": "/w/app.py",
                "model": "m",
                "script_hash": "abc"
            },
            "debugger": {"breakpoints": [{"file": "/w/app.py", "line": 3}]},
            "runtime": {"stop_reason": "line"}
        });
        let state: StateEnvelope = serde_json::from_value(legacy).unwrap();
        assert_eq!(state.kind, StateKind::Auto);
        assert!(state.perf.checkpoints.is_empty());
        assert!(state.perf.last_comparison.is_none());
        assert!(state.memory.python_snapshot_labels.is_empty());
        assert!(state.debugger.breakpoints[0].enabled);
        assert_eq!(state.debugger.breakpoints[0].context_snippet, "");
        assert_eq!(state.agent.conversation_summary, json!({}));
    }

    #[test]
    fn envelope_survives_serialization() {
        let mut state = StateEnvelope::new(
            StateKind::Manual,
            "manual",
            StateMeta {
                schema_version: SCHEMA_VERSION,
                script_path: "/w/app.py".into(),
                ..Default::default()
            },
        );
        state.name = Some("before-fix".into());
        state.debugger.watches.push("total".into());
        state.perf.checkpoints.push(PerfCheckpoint {
            label: "perf_1".into(),
            wall_time_ns: 10,
            process_time_ns: 5,
            python_peak_bytes: Some(1024),
            ..Default::default()
        });
        let text = serde_json::to_string(&state).unwrap();
        let back: StateEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn timestamps_have_fixed_width() {
        let a = now_iso();
        assert!(a.ends_with('Z'));
        assert_eq!(a.len(), "2025-01-01T00:00:00.000000Z".len());
    }
}
