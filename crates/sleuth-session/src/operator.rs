//! The human side of a session: where input lines come from and where
//! notices go.

use std::collections::VecDeque;

use async_trait::async_trait;
use sleuth_common::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Ctrl-C while waiting for input.
    Interrupt,
    Eof,
}

/// Something the session wants the operator to see.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Error(String),
    /// Output of a slash command.
    Output(String),
    /// A fragment of a streaming model reply.
    ModelDelta(String),
    /// The end of a model reply, with its full text.
    ModelReply(String),
    ToolCall(String),
    Stop {
        location: SourceLocation,
        reason: String,
        exception: Option<String>,
        /// Rendered source window around the stop line.
        source: Option<String>,
    },
    WatchChanged {
        expression: String,
        previous: Option<String>,
        current: String,
    },
}

#[async_trait]
pub trait Operator: Send {
    async fn read_line(&mut self, prompt: &str) -> InputEvent;
    fn show(&mut self, notice: Notice);
    /// Whether input comes from a person at a terminal.
    fn is_interactive(&self) -> bool;
}

/// Replays a fixed list of inputs and records every notice. Runs out into
/// [`InputEvent::Eof`].
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    inputs: VecDeque<InputEvent>,
    pub notices: Vec<Notice>,
    pub prompts: Vec<String>,
}

impl ScriptedOperator {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: lines
                .into_iter()
                .map(|l| InputEvent::Line(l.into()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: InputEvent) {
        self.inputs.push_back(event);
    }

    /// Text of every info, error and output notice, in order.
    pub fn messages(&self) -> Vec<String> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                Notice::Info(m) | Notice::Error(m) | Notice::Output(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stops(&self) -> Vec<(SourceLocation, String)> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                Notice::Stop {
                    location, reason, ..
                } => Some((location.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn read_line(&mut self, prompt: &str) -> InputEvent {
        self.prompts.push(prompt.to_string());
        self.inputs.pop_front().unwrap_or(InputEvent::Eof)
    }

    fn show(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
