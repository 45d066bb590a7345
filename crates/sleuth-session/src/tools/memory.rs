//! Memory tools, answered by tracemalloc and gc inside the target.

use serde::Deserialize;
use serde_json::{Value, json};
use sleuth_agents::FnTool;
use sleuth_agents::tools::ToolFuture;

use super::{DebugTools, NoArgs, empty_schema};
use crate::context::DebugContext;

pub fn register(registry: &mut DebugTools) {
    registry.register(FnTool::new(
        "memory_snapshot",
        "Take a labelled allocation snapshot. Starts tracing on first use.",
        json!({
            "type": "object",
            "properties": {"label": {"type": "string"}}
        }),
        memory_snapshot,
    ));
    registry.register(FnTool::new(
        "memory_compare",
        "Compare two snapshots and list the allocation sites that changed most.",
        json!({
            "type": "object",
            "properties": {
                "label_a": {"type": "string"},
                "label_b": {"type": "string"},
                "top_n": {"type": "integer"}
            },
            "required": ["label_a", "label_b"]
        }),
        memory_compare,
    ));
    registry.register(FnTool::new(
        "memory_top_allocations",
        "Largest allocation sites in the latest snapshot.",
        json!({
            "type": "object",
            "properties": {
                "top_n": {"type": "integer"},
                "key_type": {"type": "string", "enum": ["lineno", "filename", "traceback"]}
            }
        }),
        memory_top_allocations,
    ));
    registry.register(FnTool::new(
        "memory_current",
        "Current and peak traced memory.",
        empty_schema(),
        memory_current,
    ));
    registry.register(FnTool::new(
        "gc_stats",
        "Garbage collector counters, most common object types and uncollectable garbage.",
        json!({
            "type": "object",
            "properties": {"top_n_types": {"type": "integer"}}
        }),
        gc_stats,
    ));
    registry.register(FnTool::new(
        "detect_leaks",
        "Look for reference cycles and allocation growth between the first and last snapshot.",
        empty_schema(),
        detect_leaks,
    ));
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotArgs {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompareArgs {
    pub label_a: String,
    pub label_b: String,
    #[serde(default)]
    pub top_n: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopArgs {
    #[serde(default)]
    pub top_n: Option<u32>,
    #[serde(default)]
    pub key_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GcArgs {
    #[serde(default)]
    pub top_n_types: Option<u32>,
}

fn memory_snapshot(ctx: &mut DebugContext, args: SnapshotArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let label = args.label.filter(|l| !l.trim().is_empty());
        let reply = ctx
            .request("memory_snapshot", json!({ "label": label }))
            .await?;
        if let Some(label) = reply.get("label").and_then(Value::as_str) {
            ctx.record_memory_label(label);
        }
        Ok(reply)
    })
}

fn memory_compare(ctx: &mut DebugContext, args: CompareArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.request(
            "memory_compare",
            json!({
                "label_a": args.label_a,
                "label_b": args.label_b,
                "top_n": args.top_n.unwrap_or(20),
            }),
        )
        .await
    })
}

fn memory_top_allocations(ctx: &mut DebugContext, args: TopArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        let top = ctx
            .request(
                "memory_top",
                json!({
                    "top_n": args.top_n.unwrap_or(20),
                    "key_type": args.key_type.as_deref().unwrap_or("lineno"),
                }),
            )
            .await?;
        Ok(json!({ "top_allocations": top }))
    })
}

fn memory_current(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move { ctx.request("memory_current", json!({})).await })
}

fn gc_stats(ctx: &mut DebugContext, args: GcArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.request(
            "gc_stats",
            json!({ "top_n_types": args.top_n_types.unwrap_or(20) }),
        )
        .await
    })
}

fn detect_leaks(ctx: &mut DebugContext, _: NoArgs) -> ToolFuture<'_> {
    Box::pin(async move { ctx.detect_leaks().await })
}
