use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use sleuth_agents::tools::ToolFuture;
use sleuth_agents::{AgentRuntime, BoundTools, FnTool, OpenAiProvider, ToolRegistry, TurnOutcome};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Frame {
    reads: Vec<String>,
}

#[derive(Deserialize)]
struct InspectArgs {
    name: String,
}

fn inspect(ctx: &mut Frame, args: InspectArgs) -> ToolFuture<'_> {
    Box::pin(async move {
        ctx.reads.push(args.name.clone());
        Ok(json!({"name": args.name, "type": "int", "value": "0"}))
    })
}

fn registry() -> ToolRegistry<Frame> {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new(
        "inspect_variable",
        "Inspect a variable in the current frame",
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }),
        inspect,
    ));
    registry
}

fn text_completion(text: &str) -> serde_json::Value {
    json!({
        "model": "m",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn tool_round_trip_through_provider() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "inspect_variable", "arguments": "{\"name\":\"count\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("count is 0")))
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAiProvider::new("k".into(), Some(server.uri())));
    let mut runtime = AgentRuntime::new(provider, "m");
    runtime.set_system_prompt("debugger");

    let registry = registry();
    let mut frame = Frame::default();
    let mut host = BoundTools::new(&registry, &mut frame);
    let outcome = runtime
        .send_message("why does it divide by zero?", Some(&mut host))
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Reply("count is 0".into()));
    assert_eq!(frame.reads, vec!["count".to_string()]);
    // user, assistant tool call, tool result, assistant reply
    assert_eq!(runtime.conversation().len(), 4);
}

#[tokio::test]
async fn retries_once_on_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("recovered")))
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAiProvider::new("k".into(), Some(server.uri())));
    let mut runtime = AgentRuntime::new(provider, "m");
    let outcome = runtime.send_message("hi", None).await.unwrap();
    assert_eq!(outcome.text(), "recovered");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAiProvider::new("k".into(), Some(server.uri())));
    let mut runtime = AgentRuntime::new(provider, "m");
    let err = runtime.send_message("hi", None).await.unwrap_err();
    assert!(err.to_string().contains("status=400"));
}

#[tokio::test]
async fn streaming_turn_dispatches_accumulated_call() {
    let server = MockServer::start().await;

    let first = [
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_s","function":{"name":"inspect_variable","arguments":""}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"name\":"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"total\"}"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        "data: [DONE]",
    ];
    let second = [
        r#"data: {"choices":[{"index":0,"delta":{"content":"total "}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"content":"is 0"},"finish_reason":"stop"}]}"#,
        "data: [DONE]",
    ];
    let body = |lines: &[&str]| lines.iter().map(|l| format!("{l}\n\n")).collect::<String>();

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body(&first[..])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body(&second[..])),
        )
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAiProvider::new("k".into(), Some(server.uri())));
    let mut runtime = AgentRuntime::new(provider, "m");
    let registry = registry();
    let mut frame = Frame::default();
    let mut host = BoundTools::new(&registry, &mut frame);
    let (tx, mut rx) = mpsc::channel(32);

    let outcome = runtime
        .send_message_streaming("what is total?", Some(&mut host), tx)
        .await
        .unwrap();

    assert_eq!(outcome.text(), "total is 0");
    assert_eq!(frame.reads, vec!["total".to_string()]);

    let mut streamed = String::new();
    while let Ok(delta) = rx.try_recv() {
        streamed.push_str(&delta);
    }
    assert_eq!(streamed, "total is 0");
}
