//! Compile-time break injection for the entry script.
//!
//! Lines are inserted into the source text handed to the interpreter, never
//! into the file on disk. [`LineShift`] translates between the two numberings.

use std::path::Path;

use sleuth_common::paths::{absolute_string, basename};

/// Name of the builtin the tracer agent installs for injected breaks.
pub const BREAK_BUILTIN: &str = "__sleuth_break__";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionPlan {
    /// Sorted, de-duplicated original line numbers.
    pub lines: Vec<u32>,
    /// One message per rejected spec.
    pub diagnostics: Vec<String>,
}

/// Validate `FILE:LINE` specs against the entry script. Specs for other
/// files are rejected with a diagnostic.
pub fn resolve_injected_break_lines(script: &Path, specs: &[String]) -> InjectionPlan {
    let script_abs = absolute_string(script);
    let script_base = basename(&script_abs).to_string();
    let mut plan = InjectionPlan::default();

    for spec in specs {
        let Some((file, line)) = spec.rsplit_once(':') else {
            plan.diagnostics
                .push(format!("Invalid --inject-break spec (expected FILE:LINE): {spec}"));
            continue;
        };
        let Ok(line) = line.trim().parse::<i64>() else {
            plan.diagnostics
                .push(format!("Invalid --inject-break line number: {line}"));
            continue;
        };
        let target = absolute_string(file);
        if target != script_abs && basename(&target) != script_base {
            plan.diagnostics.push(format!(
                "--inject-break only supports the entry script; skipping {spec}"
            ));
            continue;
        }
        if line < 1 {
            plan.diagnostics
                .push(format!("--inject-break line must be >= 1: {spec}"));
            continue;
        }
        plan.lines.push(line as u32);
    }

    plan.lines.sort_unstable();
    plan.lines.dedup();
    plan
}

/// Maps entry-script line numbers between the file on disk ("original") and
/// the injected source the interpreter runs ("compiled").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineShift {
    injected: Vec<u32>,
}

impl LineShift {
    pub fn is_empty(&self) -> bool {
        self.injected.is_empty()
    }

    /// Original lines that received an injected break.
    pub fn injected_lines(&self) -> &[u32] {
        &self.injected
    }

    /// Compiled line numbers of the injected calls themselves.
    pub fn injected_compiled_lines(&self) -> Vec<u32> {
        self.injected
            .iter()
            .enumerate()
            .map(|(i, line)| line + i as u32)
            .collect()
    }

    pub fn to_compiled(&self, original: u32) -> u32 {
        original + self.injected.iter().filter(|&&l| l <= original).count() as u32
    }

    /// An injected line maps to the original line it precedes.
    pub fn to_original(&self, compiled: u32) -> u32 {
        let mut shift = 0;
        for (i, &line) in self.injected.iter().enumerate() {
            let position = line + i as u32;
            if position < compiled {
                shift = i as u32 + 1;
            } else if position == compiled {
                return line;
            } else {
                break;
            }
        }
        compiled - shift
    }
}

/// Insert a break call before each listed line, matching its indentation.
/// Lines past the end of the source are ignored.
pub fn inject_breaks(source: &str, lines: &[u32]) -> (String, LineShift) {
    let mut source_lines: Vec<String> = source.split_inclusive('\n').map(str::to_string).collect();
    if source_lines.is_empty() {
        return (source.to_string(), LineShift::default());
    }
    let total = source_lines.len() as u32;

    let mut applied: Vec<u32> = lines
        .iter()
        .copied()
        .filter(|&l| l >= 1 && l <= total)
        .collect();
    applied.sort_unstable();
    applied.dedup();

    for &line in applied.iter().rev() {
        let target = &source_lines[line as usize - 1];
        let indent: String = target.chars().take_while(|c| c.is_whitespace() && *c != '\n').collect();
        source_lines.insert(
            line as usize - 1,
            format!("{indent}{BREAK_BUILTIN}()  # sleuth:injected-break\n"),
        );
    }

    (source_lines.concat(), LineShift { injected: applied })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn injects_with_indentation() {
        let source = "def f():\n    x = 1\n    return x\n";
        let (out, shift) = inject_breaks(source, &[3, 99]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[2], "    __sleuth_break__()  # sleuth:injected-break");
        assert_eq!(lines[3], "    return x");
        assert_eq!(shift.injected_lines(), &[3]);
    }

    #[test]
    fn line_shift_round_trips() {
        let (_, shift) = inject_breaks("a\nb\nc\nd\ne\n", &[2, 4]);
        // compiled: 1 a, 2 brk, 3 b, 4 c, 5 brk, 6 d, 7 e
        assert_eq!(shift.injected_compiled_lines(), vec![2, 5]);
        for original in 1..=5 {
            assert_eq!(shift.to_original(shift.to_compiled(original)), original);
        }
        assert_eq!(shift.to_compiled(4), 6);
        assert_eq!(shift.to_original(2), 2);
        assert_eq!(shift.to_original(5), 4);
        assert_eq!(shift.to_original(7), 5);
    }

    #[test]
    fn only_the_entry_script_is_accepted() {
        let script = PathBuf::from("/work/app/main.py");
        let specs = vec![
            "/work/app/main.py:3".to_string(),
            "main.py:3".to_string(),
            "other.py:4".to_string(),
            "main.py:zero".to_string(),
            "nocolon".to_string(),
            "main.py:0".to_string(),
        ];
        let plan = resolve_injected_break_lines(&script, &specs);
        assert_eq!(plan.lines, vec![3]);
        assert_eq!(plan.diagnostics.len(), 4);
        assert!(plan.diagnostics[0].contains("only supports the entry script"));
    }
}
