use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sleuth_common::Result;

/// Something that can evaluate expressions in the paused target's scope.
#[async_trait]
pub trait ExpressionEvaluator: Send {
    /// Evaluate an expression (or execute a statement) in the given frame of
    /// the pause-time stack; `None` is the innermost frame.
    async fn evaluate(&mut self, expression: &str, frame_index: Option<usize>)
    -> Result<EvalOutcome>;

    /// Truthiness of a breakpoint condition in the innermost frame. An error
    /// means the condition itself raised.
    async fn check_condition(&mut self, expression: &str) -> Result<bool>;
}

/// Result of evaluating an expression in the target.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Value {
        expression: String,
        repr: String,
        type_name: String,
        stdout: Option<String>,
        stderr: Option<String>,
    },
    Failed {
        expression: String,
        kind: String,
        message: String,
        stdout: Option<String>,
        stderr: Option<String>,
    },
}

impl EvalOutcome {
    /// Build from the agent's `{expression, result, type}` / `{expression, error}` reply.
    pub fn from_reply(expression: &str, reply: &Value) -> Self {
        let text = |key: &str| reply.get(key).and_then(Value::as_str).map(str::to_string);
        let stdout = text("stdout");
        let stderr = text("stderr");

        if let Some(error) = text("error") {
            let (kind, message) = match error.split_once(": ") {
                Some((kind, message)) => (kind.to_string(), message.to_string()),
                None => ("Error".to_string(), error),
            };
            return EvalOutcome::Failed {
                expression: expression.to_string(),
                kind,
                message,
                stdout,
                stderr,
            };
        }

        EvalOutcome::Value {
            expression: expression.to_string(),
            repr: text("result").unwrap_or_default(),
            type_name: text("type").unwrap_or_default(),
            stdout,
            stderr,
        }
    }

    pub fn failed(expression: &str, kind: &str, message: impl Into<String>) -> Self {
        EvalOutcome::Failed {
            expression: expression.to_string(),
            kind: kind.to_string(),
            message: message.into(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, EvalOutcome::Value { .. })
    }

    /// The value repr, or `<error: Kind: message>`.
    pub fn display_value(&self) -> String {
        match self {
            EvalOutcome::Value { repr, .. } => repr.clone(),
            EvalOutcome::Failed { .. } => format!("<error: {}>", self.error_text().unwrap_or_default()),
        }
    }

    pub fn error_text(&self) -> Option<String> {
        match self {
            EvalOutcome::Failed { kind, message, .. } => Some(format!("{kind}: {message}")),
            EvalOutcome::Value { .. } => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            EvalOutcome::Value { type_name, .. } => type_name,
            EvalOutcome::Failed { .. } => "",
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        let (expression, stdout, stderr) = match self {
            EvalOutcome::Value {
                expression,
                repr,
                type_name,
                stdout,
                stderr,
            } => {
                out.insert("result".into(), json!(repr));
                out.insert("type".into(), json!(type_name));
                (expression, stdout, stderr)
            }
            EvalOutcome::Failed {
                expression,
                stdout,
                stderr,
                ..
            } => {
                out.insert("error".into(), json!(self.error_text()));
                (expression, stdout, stderr)
            }
        };
        out.insert("expression".into(), json!(expression));
        if let Some(s) = stdout {
            out.insert("stdout".into(), json!(s));
        }
        if let Some(s) = stderr {
            out.insert("stderr".into(), json!(s));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_value_reply() {
        let outcome = EvalOutcome::from_reply(
            "total / count",
            &json!({"expression": "total / count", "result": "2.5", "type": "float", "stdout": "hi\n"}),
        );
        assert!(outcome.is_ok());
        assert_eq!(outcome.display_value(), "2.5");
        assert_eq!(outcome.type_name(), "float");
        assert_eq!(outcome.to_json()["stdout"], "hi\n");
    }

    #[test]
    fn splits_error_kind() {
        let outcome = EvalOutcome::from_reply(
            "1/0",
            &json!({"expression": "1/0", "error": "ZeroDivisionError: division by zero"}),
        );
        match &outcome {
            EvalOutcome::Failed { kind, message, .. } => {
                assert_eq!(kind, "ZeroDivisionError");
                assert_eq!(message, "division by zero");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            outcome.to_json()["error"],
            "ZeroDivisionError: division by zero"
        );
        assert!(outcome.to_json().get("result").is_none());
    }
}
