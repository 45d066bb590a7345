pub mod schema;

use std::marker::PhantomData;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sleuth_common::{Error, Result};
use tracing::{debug, warn};

use crate::providers::ToolDefinition;
use crate::truncation::truncate_middle;

pub use schema::validate_arguments;

/// Default cap on a serialised tool result.
pub const DEFAULT_MAX_RESULT_LENGTH: usize = 8000;

/// A tool the model can call. `C` is the mutable context tools operate on.
#[async_trait]
pub trait Tool<C: Send>: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, ctx: &mut C, args: Value) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub type ToolFuture<'a> = BoxFuture<'a, Result<Value>>;

/// Adapts a plain function taking a typed argument struct into a [`Tool`].
pub struct FnTool<C, A> {
    name: &'static str,
    description: &'static str,
    schema: Value,
    handler: for<'a> fn(&'a mut C, A) -> ToolFuture<'a>,
    _args: PhantomData<fn() -> A>,
}

impl<C, A> FnTool<C, A> {
    pub fn new(
        name: &'static str,
        description: &'static str,
        schema: Value,
        handler: for<'a> fn(&'a mut C, A) -> ToolFuture<'a>,
    ) -> Self {
        Self {
            name,
            description,
            schema,
            handler,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<C, A> Tool<C> for FnTool<C, A>
where
    C: Send,
    A: DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, ctx: &mut C, args: Value) -> Result<Value> {
        let parsed: A = serde_json::from_value(args)
            .map_err(|e| Error::Validation(format!("invalid arguments for {}: {e}", self.name)))?;
        (self.handler)(ctx, parsed).await
    }
}

/// Name → tool mapping. Executes by name, validates arguments against the
/// declared schema first, and turns every failure into an error payload.
pub struct ToolRegistry<C> {
    tools: Vec<Box<dyn Tool<C>>>,
    max_result_length: usize,
}

impl<C: Send> ToolRegistry<C> {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            max_result_length: DEFAULT_MAX_RESULT_LENGTH,
        }
    }

    pub fn with_max_result_length(mut self, max: usize) -> Self {
        self.max_result_length = max;
        self
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool<C> + 'static) {
        let name = tool.name().to_string();
        self.tools.retain(|t| t.name() != name);
        debug!("registered tool: {}", name);
        self.tools.push(Box::new(tool));
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Definitions for the named subset, in registration order.
    pub fn definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| names.contains(&t.name()))
            .map(|t| t.definition())
            .collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Tool<C>> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Run a tool and return its serialised (and possibly truncated) result.
    pub async fn execute(&self, ctx: &mut C, name: &str, args: Value) -> String {
        let value = match self.find(name) {
            None => json!({ "error": format!("Unknown tool: {name}") }),
            Some(tool) => match validate_arguments(&tool.input_schema(), &args) {
                Err(msg) => {
                    warn!("rejected call to {}: {}", name, msg);
                    json!({ "error": Error::Validation(msg).to_payload_message() })
                }
                Ok(()) => match tool.execute(ctx, args).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("tool {} failed: {}", name, e);
                        json!({ "error": e.to_payload_message() })
                    }
                },
            },
        };
        let text = match value {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|e| {
                json!({ "error": format!("SerializationError: {e}") }).to_string()
            }),
        };
        truncate_middle(&text, self.max_result_length)
    }
}

impl<C: Send> Default for ToolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// What the tool-calling loop needs from whoever owns the tools.
#[async_trait]
pub trait ToolHost: Send {
    fn tool_definitions(&self) -> Vec<ToolDefinition>;
    async fn dispatch(&mut self, name: &str, args: Value) -> String;
}

/// A registry bound to the context its tools mutate, optionally limited to a
/// named subset of its tools.
pub struct BoundTools<'a, C> {
    registry: &'a ToolRegistry<C>,
    ctx: &'a mut C,
    allowed: Option<Vec<String>>,
}

impl<'a, C> BoundTools<'a, C> {
    pub fn new(registry: &'a ToolRegistry<C>, ctx: &'a mut C) -> Self {
        Self {
            registry,
            ctx,
            allowed: None,
        }
    }

    /// Only expose and dispatch the named tools.
    pub fn restricted(mut self, names: &[&str]) -> Self {
        self.allowed = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }
}

#[async_trait]
impl<C: Send> ToolHost for BoundTools<'_, C> {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        match &self.allowed {
            None => self.registry.definitions(),
            Some(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                self.registry.definitions_for(&names)
            }
        }
    }

    async fn dispatch(&mut self, name: &str, args: Value) -> String {
        if !self.is_allowed(name) {
            warn!("tool {} is not available right now", name);
            return json!({ "error": format!("Tool not available in this phase: {name}") })
                .to_string();
        }
        self.registry.execute(&mut *self.ctx, name, args).await
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Default)]
    struct Counter {
        value: i64,
    }

    #[derive(Deserialize)]
    struct AddArgs {
        amount: i64,
    }

    fn add(ctx: &mut Counter, args: AddArgs) -> ToolFuture<'_> {
        Box::pin(async move {
            if args.amount < 0 {
                return Err(Error::Tool("amount must be positive".into()));
            }
            ctx.value += args.amount;
            Ok(json!({ "value": ctx.value }))
        })
    }

    fn registry() -> ToolRegistry<Counter> {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new(
            "add",
            "Add to the counter",
            json!({
                "type": "object",
                "properties": {"amount": {"type": "integer"}},
                "required": ["amount"]
            }),
            add,
        ));
        registry
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let registry = registry();
        let mut ctx = Counter::default();
        let out = registry.execute(&mut ctx, "add", json!({"amount": 2})).await;
        assert_eq!(ctx.value, 2);
        assert!(out.contains("\"value\": 2"));
    }

    #[tokio::test]
    async fn unknown_tool_reports_error() {
        let registry = registry();
        let mut ctx = Counter::default();
        let out = registry.execute(&mut ctx, "nope", json!({})).await;
        assert!(out.contains("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn validation_runs_before_handler() {
        let registry = registry();
        let mut ctx = Counter::default();
        let out = registry.execute(&mut ctx, "add", json!({"amount": "2"})).await;
        assert!(out.contains("ValidationError"));
        assert_eq!(ctx.value, 0);
    }

    #[tokio::test]
    async fn handler_errors_become_payloads() {
        let registry = registry();
        let mut ctx = Counter::default();
        let out = registry.execute(&mut ctx, "add", json!({"amount": -1})).await;
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"], "ToolError: amount must be positive");
    }

    #[tokio::test]
    async fn results_are_truncated() {
        fn big(_: &mut Counter, _: serde_json::Map<String, Value>) -> ToolFuture<'_> {
            Box::pin(async { Ok(Value::String("y".repeat(10_000))) })
        }
        let mut registry = ToolRegistry::new().with_max_result_length(500);
        registry.register(FnTool::new("big", "Big output", json!({"type": "object"}), big));
        let mut ctx = Counter::default();
        let out = registry.execute(&mut ctx, "big", json!({})).await;
        assert!(out.contains("(truncated 9500 chars)"));
    }

    #[tokio::test]
    async fn restricted_binding_hides_other_tools() {
        let registry = registry();
        let mut ctx = Counter::default();
        let mut host = BoundTools::new(&registry, &mut ctx).restricted(&["other"]);
        assert!(host.tool_definitions().is_empty());
        let out = host.dispatch("add", json!({"amount": 1})).await;
        assert!(out.contains("Tool not available in this phase: add"));
        drop(host);
        assert_eq!(ctx.value, 0);
    }

    #[test]
    fn registration_replaces_same_name() {
        let mut registry = registry();
        registry.register(FnTool::new("add", "Second", json!({"type": "object"}), add));
        assert_eq!(registry.list_tools(), vec!["add"]);
        assert_eq!(registry.definitions()[0].description, "Second");
        assert!(registry.has_tool("add"));
        assert_eq!(registry.definitions_for(&["missing"]).len(), 0);
    }
}
