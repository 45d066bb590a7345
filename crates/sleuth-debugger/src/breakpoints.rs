use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sleuth_common::{Error, Result};
use tracing::{debug, warn};

use crate::evaluation::ExpressionEvaluator;
use sleuth_common::paths::absolute_string;
use crate::source::SourceProvider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub number: u32,
    pub file: String,
    pub line: u32,
    pub enabled: bool,
    pub temporary: bool,
    pub condition: Option<String>,
    pub hits: u32,
    pub ignore_count: u32,
    /// Source text of the line when the breakpoint was set.
    pub snippet: Option<String>,
}

/// A parsed `file:line [if condition]` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
}

/// A breakpoint that decided to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointHit {
    pub number: u32,
    /// Set when the condition raised; the stop happens regardless.
    pub condition_error: Option<String>,
}

/// The breakpoint table, at most one breakpoint per `(file, line)`.
#[derive(Debug, Clone)]
pub struct BreakpointTable {
    entries: BTreeMap<(String, u32), Breakpoint>,
    next_number: u32,
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_number: 1,
        }
    }
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or update) a breakpoint. The line must exist in the file.
    pub fn set(
        &mut self,
        source: &SourceProvider,
        file: &str,
        line: u32,
        condition: Option<String>,
        temporary: bool,
    ) -> Result<Breakpoint> {
        let file = absolute_string(file);
        let Some(text) = source.line_text(&file, line) else {
            return Err(Error::Debugger(format!("Line {file}:{line} does not exist")));
        };
        let condition = condition.filter(|c| !c.trim().is_empty());

        if let Some(existing) = self.entries.get_mut(&(file.clone(), line)) {
            existing.condition = condition;
            existing.temporary = temporary;
            existing.enabled = true;
            existing.snippet = Some(text.trim().to_string());
            debug!("updated breakpoint #{} at {}:{}", existing.number, file, line);
            return Ok(existing.clone());
        }

        let bp = Breakpoint {
            number: self.allocate_number(),
            file: file.clone(),
            line,
            enabled: true,
            temporary,
            condition,
            hits: 0,
            ignore_count: 0,
            snippet: Some(text.trim().to_string()),
        };
        debug!("set breakpoint #{} at {}:{}", bp.number, file, line);
        self.entries.insert((file, line), bp.clone());
        Ok(bp)
    }

    /// Insert a breakpoint from saved state without checking the file.
    pub fn restore(&mut self, mut bp: Breakpoint) -> Breakpoint {
        bp.file = absolute_string(&bp.file);
        bp.number = self.allocate_number();
        self.entries.insert((bp.file.clone(), bp.line), bp.clone());
        bp
    }

    fn allocate_number(&mut self) -> u32 {
        let n = self.next_number;
        self.next_number += 1;
        n
    }

    pub fn remove_by_number(&mut self, number: u32) -> Result<Breakpoint> {
        let key = self
            .entries
            .iter()
            .find(|(_, bp)| bp.number == number)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| Error::Debugger(format!("Breakpoint #{number} not found")))?;
        self.entries
            .remove(&key)
            .ok_or_else(|| Error::Debugger(format!("Breakpoint #{number} not found")))
    }

    pub fn remove_at(&mut self, file: &str, line: u32) -> Result<Breakpoint> {
        let file = absolute_string(file);
        self.entries
            .remove(&(file.clone(), line))
            .ok_or_else(|| Error::Debugger(format!("There is no breakpoint at {file}:{line}")))
    }

    pub fn get(&self, file: &str, line: u32) -> Option<&Breakpoint> {
        self.entries.get(&(absolute_string(file), line))
    }

    pub fn by_number_mut(&mut self, number: u32) -> Option<&mut Breakpoint> {
        self.entries.values_mut().find(|bp| bp.number == number)
    }

    /// All breakpoints ordered by number.
    pub fn list(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self.entries.values().cloned().collect();
        all.sort_by_key(|bp| bp.number);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Enabled breakpoint lines grouped by file.
    pub fn enabled_lines(&self) -> BTreeMap<String, Vec<u32>> {
        let mut out: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for bp in self.entries.values().filter(|bp| bp.enabled) {
            out.entry(bp.file.clone()).or_default().push(bp.line);
        }
        out
    }

    /// Count a pass over `file:line` and decide whether it stops.
    ///
    /// Enabled breakpoints count every pass. A false condition does not stop;
    /// a condition that raises does. A pending ignore count is consumed before
    /// stopping. Temporary breakpoints are deleted once they stop.
    pub async fn check_hit(
        &mut self,
        file: &str,
        line: u32,
        evaluator: &mut dyn ExpressionEvaluator,
    ) -> Option<BreakpointHit> {
        let key = (file.to_string(), line);
        let condition = {
            let bp = self.entries.get_mut(&key)?;
            if !bp.enabled {
                return None;
            }
            bp.hits += 1;
            bp.condition.clone()
        };

        if let Some(condition) = condition {
            match evaluator.check_condition(&condition).await {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    warn!("breakpoint condition `{}` raised: {}", condition, e.detail());
                    let number = self.entries.get(&key)?.number;
                    return Some(BreakpointHit {
                        number,
                        condition_error: Some(e.detail()),
                    });
                }
            }
        }

        let bp = self.entries.get_mut(&key)?;
        if bp.ignore_count > 0 {
            bp.ignore_count -= 1;
            return None;
        }
        let number = bp.number;
        if bp.temporary {
            self.entries.remove(&key);
        }
        Some(BreakpointHit {
            number,
            condition_error: None,
        })
    }
}

/// Parse `file:line [if condition]`. A bare line number refers to
/// `current_file`. Relative paths resolve against the directory of
/// `current_file` when the file exists there, else against the working
/// directory.
pub fn parse_spec(spec: &str, current_file: Option<&str>) -> Result<BreakpointSpec> {
    let spec = spec.trim();
    let (location, condition) = match spec.split_once(" if ") {
        Some((loc, cond)) => (loc.trim(), Some(cond.trim().to_string())),
        None => (spec, None),
    };

    if let Ok(line) = location.parse::<u32>() {
        let Some(file) = current_file else {
            return Err(Error::Debugger(
                "No filename specified and no active frame".into(),
            ));
        };
        return Ok(BreakpointSpec {
            file: absolute_string(file),
            line,
            condition,
        });
    }

    let Some((file, line)) = location.rsplit_once(':') else {
        return Err(Error::Debugger(format!(
            "Function breakpoints not yet supported: {location}"
        )));
    };
    let line: u32 = line
        .trim()
        .parse()
        .map_err(|_| Error::Debugger(format!("Invalid line number: {line}")))?;

    Ok(BreakpointSpec {
        file: resolve_relative(file.trim(), current_file),
        line,
        condition,
    })
}

fn resolve_relative(file: &str, current_file: Option<&str>) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        return absolute_string(path);
    }
    if let Some(current) = current_file
        && let Some(dir) = Path::new(current).parent()
    {
        let candidate = dir.join(path);
        if candidate.is_file() {
            return absolute_string(candidate);
        }
    }
    absolute_string(path)
}
