use serde::{Deserialize, Serialize};
use sleuth_common::{Error, Result};

/// One frame of the stack as captured at pause time. Index 0 is the
/// outermost frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub index: usize,
    pub filename: String,
    pub lineno: u32,
    pub function: String,
    pub is_current: bool,
    #[serde(default)]
    pub locals_names: Vec<String>,
}

impl FrameRecord {
    pub fn describe(&self) -> String {
        format!("{}:{} in {}", self.filename, self.lineno, self.function)
    }
}

/// The call stack frozen at the current pause. Frame indices from tools are
/// resolved against this snapshot, never against the live target.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    frames: Vec<FrameRecord>,
}

impl FrameSnapshot {
    pub fn new(frames: Vec<FrameRecord>) -> Self {
        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn current(&self) -> Option<&FrameRecord> {
        self.frames.last()
    }

    /// Resolve an optional frame index; `None` is the innermost frame.
    pub fn resolve(&self, index: Option<usize>) -> Result<&FrameRecord> {
        if self.frames.is_empty() {
            return Err(Error::Debugger("No active frame".into()));
        }
        match index {
            None => self
                .frames
                .last()
                .ok_or_else(|| Error::Debugger("No active frame".into())),
            Some(i) => self
                .frames
                .get(i)
                .ok_or_else(|| Error::Debugger(format!("Invalid frame index: {i}"))),
        }
    }

    /// `file:line in function` per frame, outermost first.
    pub fn summary(&self) -> Vec<String> {
        self.frames.iter().map(FrameRecord::describe).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
