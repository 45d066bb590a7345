//! Leak heuristics over the target's gc statistics and snapshot diffs.

use serde_json::{Value, json};

/// Allocation growth at one site, in bytes, that counts as suspicious.
pub const GROWTH_THRESHOLD_BYTES: i64 = 100_000;

const MAX_GROWTH_FINDINGS: usize = 5;

/// Classify the evidence.
///
/// `gc` is a `gc_stats` reply; `comparison` is a `memory_compare` reply for
/// the first and last snapshots, when at least two exist.
pub fn analyze_leaks(gc: Option<&Value>, comparison: Option<&Value>, snapshots: usize) -> Value {
    let mut leaks = Vec::new();

    if let Some(gc) = gc {
        let garbage = gc.get("garbage_count").and_then(Value::as_u64).unwrap_or(0);
        if garbage > 0 {
            leaks.push(json!({
                "type": "reference_cycle",
                "description": format!("{garbage} uncollectable objects in gc.garbage"),
                "types": gc.get("garbage_types").cloned().unwrap_or_else(|| json!([])),
                "confidence": "high",
                "suggestion": "Break the reference cycle or drop __del__ from objects caught in it.",
            }));
        }
    }

    if let Some(changes) = comparison
        .and_then(|c| c.get("top_changes"))
        .and_then(Value::as_array)
    {
        let growing = changes
            .iter()
            .filter(|c| {
                c.get("size_diff").and_then(Value::as_i64).unwrap_or(0) > GROWTH_THRESHOLD_BYTES
            })
            .take(MAX_GROWTH_FINDINGS);
        for change in growing {
            leaks.push(json!({
                "type": "python_allocation_growth",
                "location": change.get("file").cloned().unwrap_or(Value::Null),
                "growth": change.get("size_diff_human").cloned().unwrap_or(Value::Null),
                "current_size": change.get("size_human").cloned().unwrap_or(Value::Null),
                "count_diff": change.get("count_diff").cloned().unwrap_or(Value::Null),
                "confidence": "medium",
                "suggestion": "Memory at this allocation site grew between the first and last \
                               snapshot. Check for caches or lists that only ever grow.",
            }));
        }
    }

    if leaks.is_empty() {
        return json!({
            "status": "no_leaks_detected",
            "message": "No obvious memory leaks detected. Take more snapshots at different \
                        points for better analysis.",
            "snapshots_analyzed": snapshots,
        });
    }
    json!({
        "status": "potential_leaks_found",
        "suspected_leaks": leaks,
        "snapshots_analyzed": snapshots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_process_reports_no_leaks() {
        let gc = json!({"garbage_count": 0, "garbage_types": []});
        let out = analyze_leaks(Some(&gc), None, 1);
        assert_eq!(out["status"], "no_leaks_detected");
        assert_eq!(out["snapshots_analyzed"], 1);
    }

    #[test]
    fn growth_and_cycles_are_reported() {
        let gc = json!({"garbage_count": 2, "garbage_types": ["Node"]});
        let mut changes: Vec<Value> = (0..7)
            .map(|i| {
                json!({
                    "file": format!("app.py:{i}"),
                    "size_diff": 200_000 + i,
                    "size_diff_human": "195.3 KB",
                    "size_human": "1.0 MB",
                    "count_diff": 10,
                })
            })
            .collect();
        changes.push(json!({"file": "small.py:1", "size_diff": 50, "count_diff": 1}));
        let comparison = json!({"top_changes": changes});

        let out = analyze_leaks(Some(&gc), Some(&comparison), 3);
        assert_eq!(out["status"], "potential_leaks_found");
        let leaks = out["suspected_leaks"].as_array().unwrap();
        assert_eq!(leaks.len(), 1 + 5);
        assert_eq!(leaks[0]["type"], "reference_cycle");
        assert_eq!(leaks[0]["confidence"], "high");
        assert_eq!(leaks[1]["type"], "python_allocation_growth");
        assert_eq!(leaks[1]["location"], "app.py:0");
        assert_eq!(leaks[1]["confidence"], "medium");
        assert!(leaks.iter().all(|l| l["location"] != "small.py:1"));
    }
}
