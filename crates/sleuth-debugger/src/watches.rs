use serde::Serialize;

use crate::evaluation::{EvalOutcome, ExpressionEvaluator};

#[derive(Debug, Clone)]
struct WatchEntry {
    expression: String,
    current_value: String,
    previous_value: Option<String>,
    current_type: String,
    error: Option<String>,
    changed: bool,
    eval_count: u32,
}

impl WatchEntry {
    fn new(expression: String) -> Self {
        Self {
            expression,
            current_value: "<not evaluated>".to_string(),
            previous_value: None,
            current_type: String::new(),
            error: None,
            changed: false,
            eval_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchResult {
    pub expression: String,
    pub current_value: String,
    pub previous_value: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub changed: bool,
    pub error: Option<String>,
}

/// Watch expressions re-evaluated at every stop, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct WatchManager {
    watches: Vec<WatchEntry>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the expression is already watched.
    pub fn add(&mut self, expression: &str) -> bool {
        if self.watches.iter().any(|w| w.expression == expression) {
            return false;
        }
        self.watches.push(WatchEntry::new(expression.to_string()));
        true
    }

    pub fn remove(&mut self, expression: &str) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| w.expression != expression);
        self.watches.len() != before
    }

    pub fn expressions(&self) -> Vec<String> {
        self.watches.iter().map(|w| w.expression.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn clear(&mut self) {
        self.watches.clear();
    }

    /// Evaluate every watch. `changed` is only set once a watch has at least
    /// two evaluations, except that a newly failing watch always counts.
    pub async fn evaluate_all(
        &mut self,
        evaluator: &mut dyn ExpressionEvaluator,
        frame_index: Option<usize>,
    ) -> Vec<WatchResult> {
        let mut results = Vec::with_capacity(self.watches.len());
        for entry in &mut self.watches {
            let outcome = match evaluator.evaluate(&entry.expression, frame_index).await {
                Ok(outcome) => outcome,
                Err(e) => EvalOutcome::failed(&entry.expression, e.kind(), e.detail()),
            };

            entry.previous_value = Some(std::mem::take(&mut entry.current_value));
            entry.eval_count += 1;

            match outcome.error_text() {
                Some(error) => {
                    entry.current_value = format!("<error: {error}>");
                    entry.current_type.clear();
                    entry.error = Some(error);
                    entry.changed = entry.previous_value.as_deref() != Some(entry.current_value.as_str());
                }
                None => {
                    entry.current_value = outcome.display_value();
                    entry.current_type = outcome.type_name().to_string();
                    entry.error = None;
                    entry.changed = entry.eval_count > 1
                        && entry.previous_value.as_deref() != Some(entry.current_value.as_str());
                }
            }

            results.push(WatchResult {
                expression: entry.expression.clone(),
                current_value: entry.current_value.clone(),
                previous_value: if entry.eval_count > 1 {
                    entry.previous_value.clone()
                } else {
                    None
                },
                type_name: entry.current_type.clone(),
                changed: entry.changed,
                error: entry.error.clone(),
            });
        }
        results
    }

    pub fn changes_summary(&self) -> String {
        let changes: Vec<String> = self
            .watches
            .iter()
            .filter(|w| w.changed)
            .map(|w| {
                format!(
                    "  {}: {} -> {}",
                    w.expression,
                    w.previous_value.as_deref().unwrap_or("<none>"),
                    w.current_value
                )
            })
            .collect();
        if changes.is_empty() {
            return "No watch expressions changed.".to_string();
        }
        format!("Changed watches:\n{}", changes.join("\n"))
    }
}
