//! Source reading and editing tools.

use serde::Deserialize;
use serde_json::{Value, json};
use sleuth_agents::FnTool;
use sleuth_agents::tools::ToolFuture;

use super::DebugTools;
use crate::context::{DebugContext, Phase};

const LIVE_EDIT_NOTE: &str = "The running target still executes the old code; edits take effect after rerun_target.";

pub fn register(registry: &mut DebugTools) {
    registry.register(FnTool::new(
        "get_source_file",
        "Read a source file, optionally limited to a 1-based inclusive line range. Defaults to \
         the current frame's file, then the debugged script.",
        json!({
            "type": "object",
            "properties": {
                "file": {"type": "string"},
                "start_line": {"type": "integer"},
                "end_line": {"type": "integer"}
            }
        }),
        get_source_file,
    ));
    registry.register(FnTool::new(
        "find_snippet_lines",
        "Find where a code snippet occurs in a file. Multi-line snippets match whole blocks; \
         single lines also match as substrings.",
        json!({
            "type": "object",
            "properties": {
                "snippet": {"type": "string"},
                "file": {"type": "string"}
            },
            "required": ["snippet"]
        }),
        find_snippet_lines,
    ));
    registry.register(FnTool::new(
        "replace_file_contents",
        "Overwrite a file with new content. A checkpoint is saved first.",
        json!({
            "type": "object",
            "properties": {
                "file": {"type": "string"},
                "content": {"type": "string"},
                "create_if_missing": {"type": "boolean"}
            },
            "required": ["file", "content"]
        }),
        replace_file_contents,
    ));
    registry.register(FnTool::new(
        "replace_text_in_file",
        "Replace occurrences of old_text with new_text in a file. max_replacements defaults to \
         1; -1 replaces all. A checkpoint is saved first.",
        json!({
            "type": "object",
            "properties": {
                "file": {"type": "string"},
                "old_text": {"type": "string"},
                "new_text": {"type": "string"},
                "max_replacements": {"type": "integer"}
            },
            "required": ["file", "old_text", "new_text"]
        }),
        replace_text_in_file,
    ));
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadArgs {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SnippetArgs {
    pub snippet: String,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteArgs {
    pub file: String,
    pub content: String,
    #[serde(default)]
    pub create_if_missing: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceArgs {
    pub file: String,
    pub old_text: String,
    pub new_text: String,
    #[serde(default = "default_max_replacements")]
    pub max_replacements: i64,
}

fn default_max_replacements() -> i64 {
    1
}

fn get_source_file(ctx: &mut DebugContext, args: ReadArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let file = args.file.unwrap_or_else(|| ctx.default_file());
        let window = ctx
            .source
            .read_range(&file, args.start_line.unwrap_or(1), args.end_line)?;
        let content: Vec<String> = window
            .lines
            .iter()
            .map(|(n, text)| format!("{n:4} | {text}"))
            .collect();
        Ok(json!({
            "filename": window.filename,
            "start_line": window.start_line,
            "end_line": window.end_line,
            "total_lines": window.total_lines,
            "content": content.join("\n"),
        }))
    })
}

fn find_snippet_lines(ctx: &mut DebugContext, args: SnippetArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let file = args.file.unwrap_or_else(|| ctx.default_file());
        let found = ctx.source.find_snippet_lines(&file, &args.snippet)?;
        Ok(serde_json::to_value(found)?)
    })
}

fn replace_file_contents(ctx: &mut DebugContext, args: WriteArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.save_state(None, true, "op:replace_file_contents:before")
            .await;
        let report = ctx
            .source
            .write_file_source(&args.file, &args.content, args.create_if_missing)?;
        Ok(with_live_note(ctx, serde_json::to_value(report)?))
    })
}

fn replace_text_in_file(ctx: &mut DebugContext, args: ReplaceArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.save_state(None, true, "op:replace_text_in_file:before")
            .await;
        let report = ctx.source.replace_text_in_file(
            &args.file,
            &args.old_text,
            &args.new_text,
            args.max_replacements,
        )?;
        Ok(with_live_note(ctx, serde_json::to_value(report)?))
    })
}

fn with_live_note(ctx: &DebugContext, mut report: Value) -> Value {
    if ctx.phase() == Phase::Live {
        report["note"] = json!(LIVE_EDIT_NOTE);
    }
    report
}
