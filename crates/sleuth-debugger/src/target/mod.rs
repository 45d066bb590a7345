//! The debuggee: a Python interpreter running the tracer agent.
//!
//! The agent connects back over a loopback socket and speaks JSON lines.
//! While the target is paused the agent serves requests; a resume message
//! carries the new [`Interest`] and releases it.

mod protocol;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use sleuth_common::{Error, Result, SourceLocation};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::control::TraceEvent;
use crate::evaluation::{EvalOutcome, ExpressionEvaluator};
use crate::frames::{FrameRecord, FrameSnapshot};
use crate::inject::{LineShift, inject_breaks};
use sleuth_common::paths::absolute_string;

pub use protocol::{ExitStatus, Interest, TargetExit};
use protocol::{AgentMessage, quit_message, request_message, resume_message, start_message};

const AGENT_SOURCE: &str = include_str!("agent.py");
const PORT_ENV: &str = "SLEUTH_AGENT_PORT";
const QUIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub python: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    /// Original entry-script lines that get an injected break.
    pub injected_lines: Vec<u32>,
    pub trace_memory: bool,
    pub eval_output_limit: usize,
    pub connect_timeout: Duration,
}

impl LaunchOptions {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            python: "python3".to_string(),
            script: script.into(),
            args: Vec::new(),
            injected_lines: Vec::new(),
            trace_memory: false,
            eval_output_limit: 2000,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Trace(TraceEvent),
    Exited(TargetExit),
}

pub struct PythonTarget {
    child: Child,
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    script: String,
    shift: LineShift,
    next_id: u64,
    python_version: String,
    pid: u32,
    eval_output_limit: usize,
    paused_file: Option<String>,
    exit: Option<TargetExit>,
}

impl PythonTarget {
    /// Spawn the interpreter, wait for the agent to connect, and start the
    /// script under `interest`.
    pub async fn launch(options: &LaunchOptions, interest: &Interest) -> Result<Self> {
        let script = absolute_string(&options.script);
        if !options.script.is_file() {
            return Err(Error::Target(format!("Script not found: {script}")));
        }

        let (source, shift) = if options.injected_lines.is_empty() {
            (None, LineShift::default())
        } else {
            let text = tokio::fs::read_to_string(&script).await?;
            let (compiled, shift) = inject_breaks(&text, &options.injected_lines);
            (Some(compiled), shift)
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let mut child = Command::new(&options.python)
            .arg("-c")
            .arg(AGENT_SOURCE)
            .env(PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Target(format!(
                    "failed to spawn {}: {e} (is Python installed?)",
                    options.python
                ))
            })?;

        let stream = tokio::select! {
            accepted = listener.accept() => accepted?.0,
            status = child.wait() => {
                let status = status?;
                return Err(Error::Target(format!(
                    "{} exited before the tracer connected ({status})",
                    options.python
                )));
            }
            _ = tokio::time::sleep(options.connect_timeout) => {
                let _ = child.start_kill();
                return Err(Error::Target("Timed out waiting for the tracer to connect".into()));
            }
        };
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        let mut target = Self {
            child,
            reader: BufReader::new(read_half).lines(),
            writer,
            script,
            shift,
            next_id: 0,
            python_version: String::new(),
            pid: 0,
            eval_output_limit: options.eval_output_limit,
            paused_file: None,
            exit: None,
        };

        match target.read_message().await? {
            Some(AgentMessage::Hello { python, pid }) => {
                target.python_version = python;
                target.pid = pid;
            }
            other => {
                return Err(Error::Target(format!(
                    "expected hello from tracer, got {other:?}"
                )));
            }
        }

        let interest = target.to_compiled_interest(interest);
        let source_text = source.as_deref();
        let start = start_message(
            &target.script,
            &options.args,
            source_text,
            &target.shift.injected_compiled_lines(),
            &interest,
            options.trace_memory,
        );
        target.send(&start).await?;
        info!(
            "launched {} (python {}, pid {})",
            target.script, target.python_version, target.pid
        );
        Ok(target)
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn line_shift(&self) -> &LineShift {
        &self.shift
    }

    pub fn is_paused(&self) -> bool {
        self.paused_file.is_some()
    }

    pub fn exit_report(&self) -> Option<&TargetExit> {
        self.exit.as_ref()
    }

    /// Wait for the next event the agent reports.
    pub async fn next_event(&mut self) -> Result<TargetEvent> {
        if let Some(exit) = &self.exit {
            return Ok(TargetEvent::Exited(exit.clone()));
        }
        loop {
            match self.read_message().await? {
                Some(AgentMessage::Event {
                    kind,
                    file,
                    line,
                    function,
                    depth,
                    exception,
                }) => {
                    let line = self.to_original(&file, line);
                    self.paused_file = Some(file.clone());
                    return Ok(TargetEvent::Trace(TraceEvent {
                        kind,
                        location: SourceLocation::new(file, line, function),
                        depth,
                        exception,
                    }));
                }
                Some(AgentMessage::Exit(exit)) => return Ok(TargetEvent::Exited(self.finish(exit).await)),
                None => return Ok(TargetEvent::Exited(self.finish(TargetExit::disconnected()).await)),
                Some(other) => warn!("ignoring unexpected tracer message: {other:?}"),
            }
        }
    }

    /// Release the paused target with a new interest.
    pub async fn resume(&mut self, interest: &Interest) -> Result<()> {
        if self.paused_file.is_none() {
            return Err(Error::Target("Target is not paused".into()));
        }
        let interest = self.to_compiled_interest(interest);
        self.send(&resume_message(&interest)).await?;
        self.paused_file = None;
        Ok(())
    }

    /// Run one agent operation against the paused target.
    pub async fn request(&mut self, op: &str, params: Value) -> Result<Value> {
        if self.paused_file.is_none() {
            return Err(Error::Target("Target is not paused".into()));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.send(&request_message(id, op, params)).await?;

        loop {
            match self.read_message().await? {
                Some(AgentMessage::Reply { id: got, ok, error }) if got == id => {
                    return match error {
                        Some(error) => Err(Error::Target(error)),
                        None => Ok(ok.unwrap_or(Value::Null)),
                    };
                }
                Some(AgentMessage::Exit(exit)) => {
                    let exit = self.finish(exit).await;
                    return Err(Error::Target(exit.summary()));
                }
                None => {
                    self.finish(TargetExit::disconnected()).await;
                    return Err(Error::Target("Target process disconnected".into()));
                }
                Some(other) => debug!("dropping stale tracer message: {other:?}"),
            }
        }
    }

    /// Call stack at the current pause, entry-script lines in file numbering.
    pub async fn stack(&mut self) -> Result<FrameSnapshot> {
        let value = self.request("stack", json!({})).await?;
        let mut frames: Vec<FrameRecord> = serde_json::from_value(value)?;
        for frame in &mut frames {
            frame.lineno = self.to_original(&frame.filename, frame.lineno);
        }
        Ok(FrameSnapshot::new(frames))
    }

    /// Ask the agent to stop the program and wait for it to go away.
    pub async fn quit(&mut self) -> TargetExit {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }
        if let Err(e) = self.send(&quit_message()).await {
            debug!("quit message not delivered: {}", e.detail());
        }
        let drained = tokio::time::timeout(QUIT_GRACE, async {
            loop {
                match self.read_message().await {
                    Ok(Some(AgentMessage::Exit(exit))) => return exit,
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => return TargetExit::disconnected(),
                }
            }
        })
        .await;
        let exit = match drained {
            Ok(exit) if exit.status != ExitStatus::Disconnected => exit,
            Ok(_) => TargetExit {
                status: ExitStatus::Quit,
                code: None,
                error: None,
                traceback: None,
            },
            Err(_) => {
                warn!("tracer did not exit in time, killing pid {}", self.pid);
                let _ = self.child.start_kill();
                TargetExit {
                    status: ExitStatus::Quit,
                    code: None,
                    error: None,
                    traceback: None,
                }
            }
        };
        self.finish(exit).await
    }

    async fn finish(&mut self, exit: TargetExit) -> TargetExit {
        self.paused_file = None;
        if tokio::time::timeout(QUIT_GRACE, self.child.wait()).await.is_err() {
            let _ = self.child.start_kill();
        }
        debug!("target finished: {}", exit.status);
        self.exit = Some(exit.clone());
        exit
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Target(format!("failed to write to tracer: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Target(format!("failed to write to tracer: {e}")))
    }

    async fn read_message(&mut self) -> Result<Option<AgentMessage>> {
        loop {
            let Some(line) = self
                .reader
                .next_line()
                .await
                .map_err(|e| Error::Target(format!("failed to read from tracer: {e}")))?
            else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("malformed tracer message ({e}): {line}"),
            }
        }
    }

    fn to_original(&self, file: &str, line: u32) -> u32 {
        if file == self.script {
            self.shift.to_original(line)
        } else {
            line
        }
    }

    fn to_compiled_interest(&self, interest: &Interest) -> Interest {
        let mut mapped = interest.clone();
        if self.shift.is_empty() {
            return mapped;
        }
        if let Some(lines) = mapped.breakpoints.get_mut(&self.script) {
            for line in lines.iter_mut() {
                *line = self.shift.to_compiled(*line);
            }
        }
        if mapped.line > 0 && self.paused_file.as_deref() == Some(self.script.as_str()) {
            mapped.line = self.shift.to_compiled(mapped.line);
        }
        mapped
    }
}

#[async_trait]
impl ExpressionEvaluator for PythonTarget {
    async fn evaluate(&mut self, expression: &str, frame_index: Option<usize>) -> Result<EvalOutcome> {
        let reply = self
            .request(
                "evaluate",
                json!({
                    "expression": expression,
                    "frame_index": frame_index,
                    "output_limit": self.eval_output_limit,
                }),
            )
            .await?;
        Ok(EvalOutcome::from_reply(expression, &reply))
    }

    async fn check_condition(&mut self, expression: &str) -> Result<bool> {
        let reply = self
            .request("condition", json!({"expression": expression}))
            .await?;
        Ok(reply.as_bool().unwrap_or(false))
    }
}
