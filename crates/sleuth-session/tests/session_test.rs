use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use sleuth_agents::{ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream, MessagePart};
use sleuth_common::{Error, Result};
use sleuth_config::AppConfig;
use sleuth_session::{
    DebugContext, DebugSession, Notice, RunOptions, RunOutcome, ScriptedOperator, build_agent,
    run_debugger,
};

const SIMPLE_BUG: &str = "\
def calculate_average(numbers):
    total = 0
    for n in numbers:
        total += n
    count = len(numbers)
    return total / count

print(calculate_average([1, 2, 3]))
print(calculate_average([]))
";

/// Replays canned responses and records every request. Streaming is
/// refused, so the runtime falls back to plain completions.
#[derive(Default)]
struct ScriptedProvider {
    responses: Mutex<Vec<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn new(mut responses: Vec<LlmResponse>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::default(),
        }
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| Error::Provider("no scripted response left".into()))
    }

    async fn stream_complete(&self, _request: &LlmRequest) -> Result<LlmStream> {
        Err(Error::Provider("scripted provider does not stream".into()))
    }
}

fn text(reply: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::Text {
            text: reply.into(),
        }],
        model: "scripted".into(),
        usage: None,
        stop_reason: Some("stop".into()),
    }
}

fn tool_call(name: &str, input: serde_json::Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::ToolUse {
            id: "call_1".into(),
            name: name.into(),
            input,
            raw_arguments: None,
        }],
        model: "scripted".into(),
        usage: None,
        stop_reason: Some("tool_calls".into()),
    }
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn setup(dir: &Path, body: &str) -> (AppConfig, PathBuf) {
    let script = dir.join("simple_bug.py");
    std::fs::write(&script, body).unwrap();
    let mut config = AppConfig::default();
    config.state.dir = dir.join("state");
    config.state.issues_dir = dir.join("issues");
    config.llm.model = "scripted".into();
    (config, script)
}

fn tool_results(request: &LlmRequest) -> Vec<String> {
    request
        .messages
        .iter()
        .filter_map(|m| match &m.content {
            MessagePart::Parts(parts) => Some(parts),
            MessagePart::Text(_) => None,
        })
        .flatten()
        .filter_map(|block| match block {
            ContentBlock::ToolResult { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn restore_relocates_breakpoints_after_edits() {
    let dir = tempfile::tempdir().unwrap();
    let (config, script) = setup(dir.path(), SIMPLE_BUG);

    let mut ctx = DebugContext::new(config.clone(), &script, Vec::new()).unwrap();
    ctx.set_breakpoint_spec("6").unwrap();
    let saved = ctx.save_state(Some("before edit"), false, "manual").await;
    assert_eq!(saved["status"], "ok");

    std::fs::write(&script, format!("import sys\n\n{SIMPLE_BUG}")).unwrap();

    let mut ctx = DebugContext::new(config, &script, Vec::new()).unwrap();
    let report = ctx.load_state("before edit");
    assert_eq!(report["status"], "ok");
    assert_eq!(report["applied"]["applied_breakpoints"], 1);
    assert!(
        report["warnings"][0]
            .as_str()
            .unwrap()
            .contains("code drift detected")
    );
    let lines: Vec<u32> = ctx
        .control()
        .breakpoints()
        .list()
        .iter()
        .map(|bp| bp.line)
        .collect();
    assert_eq!(lines, vec![8]);
}

#[tokio::test]
async fn pre_run_setup_is_saved_without_starting_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let (config, script) = setup(dir.path(), SIMPLE_BUG);
    let provider = Arc::new(ScriptedProvider::default());
    let mut operator = ScriptedOperator::new(["/break 6", "/watch total", "/save setup", "/quit"]);
    let options = RunOptions {
        script: script.clone(),
        pre_run: true,
        ..RunOptions::default()
    };

    run_debugger(&config, &options, provider.clone(), &mut operator)
        .await
        .unwrap();

    assert!(provider.requests().is_empty());
    assert!(operator.stops().is_empty());
    assert_eq!(operator.prompts[0], "(sleuth pre-run) ");

    let ctx = DebugContext::new(config, &script, Vec::new()).unwrap();
    let states = ctx.store().list_states(Some(ctx.script()));
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name.as_deref(), Some("setup"));
}

#[tokio::test]
async fn model_inspects_the_paused_frame() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (config, script) = setup(dir.path(), SIMPLE_BUG);
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("evaluate_expression", json!({"expression": "total / count"})),
        text("The average here is 2.0; the empty list will divide by zero."),
    ]));

    let mut ctx = DebugContext::new(config.clone(), &script, Vec::new()).unwrap();
    ctx.set_breakpoint_spec("6").unwrap();
    let agent = build_agent(&config, provider.clone());
    let mut operator = ScriptedOperator::new(["what is the average here?", "/quit"]);

    let mut session = DebugSession::new(ctx, agent, &mut operator);
    let outcome = session.run(false).await.unwrap();
    assert_eq!(outcome, RunOutcome::Quit);
    let ctx = session.into_context();

    let stops = operator.stops();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].0.line, 6);
    assert_eq!(stops[0].1, "breakpoint #1");

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(
        requests[0]
            .system
            .as_deref()
            .unwrap()
            .contains("## Current Stop")
    );
    assert!(requests[0].tools.iter().any(|t| t.name == "evaluate_expression"));
    assert!(!requests[0].tools.iter().any(|t| t.name == "run_target"));
    let results = tool_results(&requests[1]);
    assert!(results[0].contains("2.0"), "{results:?}");

    assert!(operator.notices.iter().any(|n| matches!(
        n,
        Notice::ToolCall(call) if call.starts_with("evaluate_expression(")
    )));
    assert!(operator.notices.iter().any(|n| matches!(
        n,
        Notice::ModelReply(reply) if reply.contains("divide by zero")
    )));

    let reasons: Vec<String> = ctx
        .store()
        .list_states(Some(ctx.script()))
        .into_iter()
        .map(|s| s.reason)
        .collect();
    assert!(reasons.contains(&"stop:breakpoint".to_string()), "{reasons:?}");
    assert!(reasons.contains(&"quit".to_string()), "{reasons:?}");
}

#[tokio::test]
async fn rerun_restores_the_latest_checkpoint() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (config, script) = setup(dir.path(), SIMPLE_BUG);
    let provider = Arc::new(ScriptedProvider::default());
    let mut operator = ScriptedOperator::new(["/rerun", "/quit"]);
    let options = RunOptions {
        script: script.clone(),
        breakpoints: vec!["6".into()],
        ..RunOptions::default()
    };

    run_debugger(&config, &options, provider, &mut operator)
        .await
        .unwrap();

    let stops = operator.stops();
    assert_eq!(stops.len(), 2);
    assert!(stops.iter().all(|(location, _)| location.line == 6));
    assert!(
        operator
            .messages()
            .iter()
            .any(|m| m.starts_with("Restored state from"))
    );
}

#[tokio::test]
async fn crash_enters_post_run() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (mut config, script) = setup(dir.path(), SIMPLE_BUG);
    config.debugger.break_on_exception = false;
    let provider = Arc::new(ScriptedProvider::default());
    let mut operator = ScriptedOperator::new(["/locals", "/quit"]);

    let ctx = DebugContext::new(config.clone(), &script, Vec::new()).unwrap();
    let agent = build_agent(&config, provider);
    let mut session = DebugSession::new(ctx, agent, &mut operator);
    let outcome = session.run(false).await.unwrap();
    assert_eq!(outcome, RunOutcome::Quit);
    assert_eq!(session.context().post_run_reason(), Some("exception"));

    assert_eq!(operator.prompts, vec!["(sleuth post-run) ", "(sleuth post-run) "]);
    let messages = operator.messages();
    assert!(messages.iter().any(|m| m.contains("ZeroDivisionError")));
    assert!(messages.iter().any(|m| m.contains("No active frame")));
}
