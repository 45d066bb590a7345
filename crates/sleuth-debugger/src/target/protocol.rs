//! JSON-lines messages exchanged with the tracer agent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::control::{DebuggerState, EventKind, ExceptionInfo};

/// Which events the agent should report. Filtering in the agent keeps the
/// socket quiet while the target runs between stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub mode: String,
    pub depth: usize,
    pub line: u32,
    pub breakpoints: BTreeMap<String, Vec<u32>>,
    pub exceptions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Completed,
    Exception,
    SystemExit,
    Quit,
    /// The agent hung up without reporting an exit.
    Disconnected,
}

impl ExitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitStatus::Completed => "completed",
            ExitStatus::Exception => "exception",
            ExitStatus::SystemExit => "system_exit",
            ExitStatus::Quit => "quit",
            ExitStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the target program ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetExit {
    pub status: ExitStatus,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
}

impl TargetExit {
    pub fn disconnected() -> Self {
        Self {
            status: ExitStatus::Disconnected,
            code: None,
            error: Some("Target process disconnected".to_string()),
            traceback: None,
        }
    }

    /// Reason string recorded in checkpoints taken after the run ends.
    pub fn stop_reason(&self) -> &'static str {
        self.status.as_str()
    }

    pub fn final_state(&self) -> DebuggerState {
        match self.status {
            ExitStatus::Completed | ExitStatus::SystemExit => DebuggerState::Completed,
            ExitStatus::Quit => DebuggerState::Quit,
            ExitStatus::Exception | ExitStatus::Disconnected => DebuggerState::Crashed,
        }
    }

    pub fn summary(&self) -> String {
        match self.status {
            ExitStatus::Completed => "Program finished".to_string(),
            ExitStatus::SystemExit => {
                format!("Program exited with code {}", self.code.unwrap_or(0))
            }
            ExitStatus::Quit => "Program terminated by debugger".to_string(),
            ExitStatus::Exception | ExitStatus::Disconnected => format!(
                "Program crashed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AgentMessage {
    Hello {
        python: String,
        pid: u32,
    },
    Event {
        kind: EventKind,
        file: String,
        line: u32,
        function: String,
        depth: usize,
        #[serde(default)]
        exception: Option<ExceptionInfo>,
    },
    Reply {
        id: u64,
        #[serde(default)]
        ok: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Exit(TargetExit),
}

pub(crate) fn start_message(
    script: &str,
    args: &[String],
    source: Option<&str>,
    injected_lines: &[u32],
    interest: &Interest,
    trace_memory: bool,
) -> Value {
    json!({
        "type": "start",
        "script": script,
        "args": args,
        "source": source,
        "injected_lines": injected_lines,
        "interest": interest,
        "trace_memory": trace_memory,
    })
}

pub(crate) fn request_message(id: u64, op: &str, params: Value) -> Value {
    let mut message = match params {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    message.insert("type".into(), json!("request"));
    message.insert("id".into(), json!(id));
    message.insert("op".into(), json!(op));
    Value::Object(message)
}

pub(crate) fn resume_message(interest: &Interest) -> Value {
    json!({"type": "resume", "interest": interest})
}

pub(crate) fn quit_message() -> Value {
    json!({"type": "quit"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_events() {
        let line = r#"{"type":"event","kind":"exception","file":"/w/a.py","line":4,"function":"f","depth":1,"exception":{"type":"ZeroDivisionError","message":"division by zero","traceback":"..."}}"#;
        match serde_json::from_str::<AgentMessage>(line).unwrap() {
            AgentMessage::Event {
                kind, exception, ..
            } => {
                assert_eq!(kind, EventKind::Exception);
                assert_eq!(exception.unwrap().type_name, "ZeroDivisionError");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_exit_without_optional_fields() {
        let exit: AgentMessage =
            serde_json::from_str(r#"{"type":"exit","status":"system_exit","code":3}"#).unwrap();
        let AgentMessage::Exit(exit) = exit else {
            panic!("expected exit");
        };
        assert_eq!(exit.status, ExitStatus::SystemExit);
        assert_eq!(exit.final_state(), DebuggerState::Completed);
        assert_eq!(exit.summary(), "Program exited with code 3");
    }

    #[test]
    fn crashed_exit_maps_to_crashed_state() {
        let exit: TargetExit = serde_json::from_str(
            r#"{"status":"exception","error":"ZeroDivisionError: division by zero"}"#,
        )
        .unwrap();
        assert_eq!(exit.final_state(), DebuggerState::Crashed);
        assert_eq!(exit.stop_reason(), "exception");
    }

    #[test]
    fn request_merges_params() {
        let msg = request_message(7, "evaluate", json!({"expression": "x"}));
        assert_eq!(msg["type"], "request");
        assert_eq!(msg["id"], 7);
        assert_eq!(msg["op"], "evaluate");
        assert_eq!(msg["expression"], "x");
    }
}
