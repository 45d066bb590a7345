//! System prompts for each session phase and the steering applied to user
//! requests before they reach the model.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use sleuth_common::SourceLocation;
use sleuth_debugger::source::SourceWindow;
use sleuth_debugger::{ExceptionInfo, WatchResult};

pub const BASE_SYSTEM_PROMPT: &str = "\
You are a Python debugging assistant attached to a live, paused Python process. \
The user's script runs unmodified under the debugger.

Your tools inspect variables, evaluate expressions, read and edit source, walk \
the call stack, control execution, profile memory and record performance checkpoints.

## Method: hypothesis, evidence, conclusion

Work in a loop:

1. **Hypothesis**: before each tool call say what you expect to see and why. \
For example: \"`items` may be empty here because the filter on line 12 can reject \
everything; checking it.\"
2. **Evidence**: call a tool to collect runtime data (inspect_variable, \
evaluate_expression, get_all_locals, memory_snapshot, ...).
3. **Analysis**: read the result and say whether it confirms or refutes the hypothesis.
4. **Iterate** with a new hypothesis until the evidence is conclusive.
5. **Conclusion**: only state findings backed by observed values, citing them: \
\"`x` was `None` at line 42 (inspect_variable)\", never \"x might be None\".

Explain your reasoning between tool calls.

## Evidence

- Reading source suggests where to look; only runtime inspection is evidence.
- Every finding references an observed value, frame, memory measurement or evaluation result.
- When no runtime evidence is reachable (no active frame), say so and propose how \
to get it: breakpoints, stepping or a rerun.

## Guidelines
- Inspect before concluding. Never guess values.
- When stepping or continuing (step_into, step_over, step_out, continue_execution), \
say why and what you expect next.
- For memory growth compare snapshots instead of trusting one measurement.
- For performance, compare wall, CPU and memory deltas between perf checkpoints.
- Restore a checkpoint state when a baseline run is needed.
- Read the current file contents before editing it.
- When the user names a location, put breakpoints and stepping there first.
- When the user pastes code, locate it with find_snippet_lines before anything else.
";

/// Prompt for the phase before the target has started.
pub fn pre_run_prompt(script_path: &str) -> String {
    format!(
        "\
You are a Python debugging assistant. The target script has NOT started yet; \
this is the pre-run phase, like a debugger before `run`.

You can read source, set breakpoints, add watch expressions and set focus \
filters. Runtime tools (variables, evaluation, stepping, memory) become \
available once the script runs.

## Available now
- Read source (get_source_file) and locate code (find_snippet_lines)
- Breakpoints (set_breakpoint, remove_breakpoint, list_breakpoints)
- Watches (add_watch, remove_watch, get_watches)
- Focus filters (set_focus, clear_focus)
- Checkpoint states (save, list, load and queue restore tools)
- Start the script with run_target

## Approach
1. When the user describes a bug, read the relevant source and pick candidate lines.
2. Set breakpoints there so the run pauses where evidence can be gathered.
3. Call run_target (or ask the user to type /run) when ready.
4. Until the script runs you only have hypotheses; verification happens at a breakpoint.

Target script: {script_path}
"
    )
}

/// Prompt for the phase after the target has exited.
pub fn post_run_prompt(script_path: &str) -> String {
    format!(
        "The target process has stopped. You can still read and edit files, analyse \
pasted code and suggest fixes. Do not use execution-control tools. \
When a filename is needed, use: {script_path}. \
Checkpoint tools are available; load or queue a restore as needed. \
To verify anything at runtime (breakpoints, values), call rerun_target first."
    )
}

/// Everything known about one stop.
pub struct StopContext<'a> {
    pub reason: &'a str,
    pub location: &'a SourceLocation,
    pub exception: Option<&'a ExceptionInfo>,
    pub source: Option<&'a SourceWindow>,
    pub watches: &'a [WatchResult],
}

/// The base prompt followed by the current stop.
pub fn build_stop_context(stop: &StopContext<'_>) -> String {
    let mut out = String::from(BASE_SYSTEM_PROMPT);
    out.push_str("\n## Current Stop\n");
    let _ = writeln!(out, "- Reason: {}", stop.reason);
    let _ = writeln!(out, "- File: {}", stop.location.file);
    let _ = writeln!(out, "- Line: {}", stop.location.line);
    let _ = writeln!(out, "- Function: {}", stop.location.function);
    if let Some(exception) = stop.exception {
        let _ = writeln!(out, "- Exception: {exception}");
    }

    if let Some(window) = stop.source.filter(|w| !w.lines.is_empty()) {
        out.push_str("\n## Source Context\n```python\n");
        out.push_str(&render_source(window, stop.location.line));
        out.push_str("```\n");
    }

    let changed: Vec<&WatchResult> = stop.watches.iter().filter(|w| w.changed).collect();
    if !changed.is_empty() {
        out.push_str("\n## Watch Expression Changes\n");
        for watch in changed {
            let _ = writeln!(
                out,
                "- `{}`: {} → {}",
                watch.expression,
                watch.previous_value.as_deref().unwrap_or("<none>"),
                watch.current_value
            );
        }
    }
    out
}

/// Numbered source lines with `>>>` on `current`.
pub fn render_source(window: &SourceWindow, current: u32) -> String {
    let mut out = String::new();
    for (lineno, text) in &window.lines {
        let marker = if *lineno == current { " >>>" } else { "    " };
        let _ = writeln!(out, "{marker} {lineno:4} | {text}");
    }
    out
}

/// What the session knows when steering a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptSituation<'a> {
    pub perf_mode: bool,
    /// A frame is live and tools can inspect it.
    pub paused: bool,
    /// Checkpoint restores can be applied right now.
    pub can_restore: bool,
    /// Script path once the target has exited.
    pub post_run_script: Option<&'a str>,
}

/// Wrap a user request with workflow guidance when it looks like a perf
/// question, pasted code, or a vague bug hunt. Anything else passes through.
pub fn augment_user_prompt(input: &str, situation: &PromptSituation<'_>) -> String {
    let target_hint = situation
        .post_run_script
        .map(|p| format!(" Target file: {p}."))
        .unwrap_or_default();

    if situation.perf_mode || is_perf_prompt(input) {
        if situation.can_restore {
            return format!(
                "The user is asking about performance. Use the checkpoint workflow:\n\
                 1) Call list_checkpoint_states and list_perf_checkpoints to find baselines.\n\
                 2) If no baseline is loaded, call load_checkpoint_state (apply_now=true) \
                 or queue_checkpoint_restore.\n\
                 3) Set focused breakpoints around the suspected hot path.\n\
                 4) Create perf checkpoints before and after that code path.\n\
                 5) Compare them with compare_perf_checkpoints and report wall, CPU and memory deltas.\n\
                 6) Verify at runtime before proposing a fix.\n\n\
                 {target_hint}\nUser request:\n{input}"
            );
        }
        return format!(
            "The user is asking about performance but the runtime is not paused.\n\
             1) Inspect checkpoint states and queue a restore if needed (queue_checkpoint_restore).\n\
             2) Call rerun_target to get back to a live run.\n\
             3) Collect and compare perf checkpoints before concluding.\n\n\
             {target_hint}\nUser request:\n{input}"
        );
    }

    if let Some(code) = extract_pasted_code(input) {
        return format!(
            "The user pasted code. Locate it with find_snippet_lines to map it to file \
             lines. Where it matches, set targeted breakpoints near the suspicious lines \
             and verify with runtime tools. State a hypothesis before each tool call and \
             analyse each result before moving on. Do not conclude without observed \
             runtime evidence.{target_hint} If there is no current frame, pass the \
             filename explicitly.\n\nPasted code:\n```python\n{code}\n```"
        );
    }

    if is_generic_prompt(input) {
        if situation.paused {
            return format!(
                "The request is a broad bug hunt. Investigate iteratively:\n\
                 - Read the surrounding source (get_source_context, get_source_file) to form hypotheses.\n\
                 - For each hypothesis, state it, then gather evidence with a runtime tool \
                 (inspect_variable, evaluate_expression, get_all_locals).\n\
                 - Analyse each result before choosing the next action.\n\
                 - Set breakpoints and continue or step to reach the code paths to verify.\n\
                 - Do not conclude without runtime evidence; cite observed values.\n\n\
                 User request:\n{input}"
            );
        }
        return format!(
            "The request is a broad bug hunt. Read the source with an explicit filename \
             to form hypotheses.{target_hint}\nThe runtime is not paused, so nothing can \
             be verified yet; say so. Set breakpoints at candidate lines and call \
             rerun_target to start a live run where evidence can be gathered.\n\n\
             User request:\n{input}"
        );
    }

    input.to_string()
}

const PERF_KEYWORDS: &[&str] = &[
    "perf",
    "performance",
    "latency",
    "throughput",
    "slow",
    "regression",
    "hot path",
    "cpu",
    "benchmark",
    "timing",
];

pub fn is_perf_prompt(input: &str) -> bool {
    let lowered = input.to_lowercase();
    PERF_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Short requests that name no file, line, or symbol.
pub fn is_generic_prompt(input: &str) -> bool {
    static LOCATION_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?x)
              \.py\b
            | :\d+
            | \bline\s+\d+\b
            | \bfunction\b
            | \bclass\b
            | \btraceback\b
            | \bstack\b
            | \bframe\b
            | \blocals?\b
            | \bvariable\b
            | /
            | \\
            ",
        )
        .expect("location marker regex should compile")
    });

    let lowered = input.trim().to_lowercase();
    lowered.chars().count() <= 240 && !LOCATION_MARKERS.is_match(&lowered)
}

/// Code from a fenced block, or from a message with at least three
/// non-empty lines of which two or more look like code.
pub fn extract_pasted_code(input: &str) -> Option<String> {
    static FENCED: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)```(?:python)?\n(?P<code>[\s\S]+?)\n```")
            .expect("fenced code regex should compile")
    });
    const CODE_TOKENS: &[&str] = &["def ", "class ", "=", "return", "if ", "for ", "while "];

    if let Some(caps) = FENCED.captures(input) {
        let code = caps["code"].trim_matches('\n');
        return (!code.is_empty()).then(|| code.to_string());
    }

    if !input.contains('\n') {
        return None;
    }
    let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 3 {
        return None;
    }
    let code_like = lines
        .iter()
        .filter(|l| CODE_TOKENS.iter().any(|t| l.contains(t)))
        .count();
    (code_like >= 2).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn window() -> SourceWindow {
        SourceWindow {
            filename: "/w/a.py".into(),
            start_line: 4,
            end_line: 6,
            total_lines: 10,
            lines: BTreeMap::from([
                (4, "    total += n".to_string()),
                (5, "    count = len(numbers)".to_string()),
                (6, "    return total / count".to_string()),
            ]),
        }
    }

    #[test]
    fn stop_context_marks_current_line_and_changes() {
        let location = SourceLocation::new("/w/a.py", 6, "calculate_average");
        let exception = ExceptionInfo {
            type_name: "ZeroDivisionError".into(),
            message: "division by zero".into(),
            traceback: String::new(),
        };
        let watches = vec![
            WatchResult {
                expression: "total".into(),
                current_value: "6".into(),
                previous_value: Some("3".into()),
                type_name: "int".into(),
                changed: true,
                error: None,
            },
            WatchResult {
                expression: "count".into(),
                current_value: "3".into(),
                previous_value: Some("3".into()),
                type_name: "int".into(),
                changed: false,
                error: None,
            },
        ];
        let window = window();
        let prompt = build_stop_context(&StopContext {
            reason: "exception",
            location: &location,
            exception: Some(&exception),
            source: Some(&window),
            watches: &watches,
        });

        assert!(prompt.starts_with(BASE_SYSTEM_PROMPT));
        assert!(prompt.contains("- Reason: exception"));
        assert!(prompt.contains("- Exception: ZeroDivisionError: division by zero"));
        assert!(prompt.contains(" >>>    6 |     return total / count"));
        assert!(prompt.contains("        5 |     count = len(numbers)"));
        assert!(prompt.contains("- `total`: 3 → 6"));
        assert!(!prompt.contains("`count`"));
    }

    #[test]
    fn perf_keywords_take_precedence() {
        let paused = PromptSituation {
            paused: true,
            can_restore: true,
            ..Default::default()
        };
        let out = augment_user_prompt("why is this so slow?", &paused);
        assert!(out.contains("compare_perf_checkpoints"));
        assert!(out.ends_with("User request:\nwhy is this so slow?"));

        let stopped = PromptSituation {
            post_run_script: Some("/w/a.py"),
            ..Default::default()
        };
        let out = augment_user_prompt("check the latency", &stopped);
        assert!(out.contains("rerun_target"));
        assert!(out.contains(" Target file: /w/a.py."));

        let forced = PromptSituation {
            perf_mode: true,
            ..Default::default()
        };
        assert!(augment_user_prompt("look at line 4 of a.py", &forced).contains("perf checkpoints"));
    }

    #[test]
    fn pasted_code_is_detected() {
        let fenced = "what about this?\n```python\nx = 1\nreturn x\n```";
        assert_eq!(extract_pasted_code(fenced).as_deref(), Some("x = 1\nreturn x"));

        let loose = "def f(a):\n    b = a + 1\n    return b";
        assert_eq!(extract_pasted_code(loose).as_deref(), Some(loose));

        assert_eq!(extract_pasted_code("one line = 2"), None);
        assert_eq!(extract_pasted_code("hello\nthere\nfriend"), None);

        let out = augment_user_prompt(loose, &PromptSituation::default());
        assert!(out.contains("find_snippet_lines"));
        assert!(out.ends_with("```python\ndef f(a):\n    b = a + 1\n    return b\n```"));
    }

    #[test]
    fn generic_prompts_lack_location_markers() {
        assert!(is_generic_prompt("find the bug"));
        assert!(!is_generic_prompt("look at app.py"));
        assert!(!is_generic_prompt("what happens on line 12"));
        assert!(!is_generic_prompt("check the locals"));
        assert!(!is_generic_prompt("see src/app"));
        assert!(!is_generic_prompt(&"why ".repeat(70)));

        let out = augment_user_prompt("find the bug", &PromptSituation::default());
        assert!(out.contains("not paused"));
        let out = augment_user_prompt(
            "find the bug",
            &PromptSituation {
                paused: true,
                can_restore: true,
                ..Default::default()
            },
        );
        assert!(out.contains("inspect_variable"));

        assert_eq!(
            augment_user_prompt("inspect x in frame 2", &PromptSituation::default()),
            "inspect x in frame 2"
        );
    }
}
