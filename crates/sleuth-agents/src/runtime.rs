use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use sleuth_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::conversation::{ConversationDigest, ConversationStore};
use crate::openai::parse_arguments;
use crate::providers::{
    ChatMessage, ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamContent,
    ToolDefinition,
};
use crate::tools::ToolHost;

const RESTORED_SUMMARY_PREAMBLE: &str = "Restored session summary from previous run. Use as context only; verify assumptions with live tools.\n";

const LOOP_GUARD_MESSAGE: &str = "Loop guard: repeated identical file-edit call blocked. Change tool arguments or inspect runtime state before editing again.";

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Callback fired with the tool name and raw arguments before every dispatch.
pub type ToolCallObserver = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Safety limits for one user turn.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    pub max_tool_rounds: usize,
    pub loop_guard_threshold: usize,
    pub guarded_tools: Vec<String>,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_tool_rounds: 25,
            loop_guard_threshold: 2,
            guarded_tools: vec![
                "replace_text_in_file".to_string(),
                "replace_file_contents".to_string(),
            ],
        }
    }
}

/// How a user turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered with text only.
    Reply(String),
    /// The model kept requesting tools past the round cap.
    RoundLimitExceeded { rounds: usize },
}

impl TurnOutcome {
    pub fn text(&self) -> String {
        match self {
            TurnOutcome::Reply(text) => text.clone(),
            TurnOutcome::RoundLimitExceeded { rounds } => format!(
                "Stopped after too many tool-call rounds ({rounds}). Try a more specific request."
            ),
        }
    }

    pub fn is_round_limit(&self) -> bool {
        matches!(self, TurnOutcome::RoundLimitExceeded { .. })
    }
}

/// A tool call assembled from a response, ready for dispatch.
#[derive(Debug, Clone, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn input(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return json!({});
        }
        parse_arguments(&self.arguments)
    }
}

/// Drives the tool-calling conversation with one LLM provider.
pub struct AgentRuntime {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    max_retries: u32,
    limits: RuntimeLimits,
    conversation: ConversationStore,
    system_prompt: Option<String>,
    restored_summary: Option<Value>,
    tool_schema_override: Option<Vec<ToolDefinition>>,
    observer: Option<ToolCallObserver>,
    write_call_counts: HashMap<String, usize>,
}

impl AgentRuntime {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: Some(4096),
            temperature: None,
            max_retries: 1,
            limits: RuntimeLimits::default(),
            conversation: ConversationStore::new(100, 8000),
            system_prompt: None,
            restored_summary: None,
            tool_schema_override: None,
            observer: None,
            write_call_counts: HashMap::new(),
        }
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_conversation(mut self, conversation: ConversationStore) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.max_tokens = Some(max_tokens);
    }

    pub fn set_temperature(&mut self, temperature: Option<f64>) {
        self.temperature = temperature;
    }

    pub fn set_max_retries(&mut self, retries: u32) {
        self.max_retries = retries;
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.system_prompt = if prompt.is_empty() { None } else { Some(prompt) };
    }

    /// Attach a digest from a previous session. It is sent as context-only
    /// system content ahead of the history on every following request.
    pub fn set_restored_summary(&mut self, summary: Option<Value>) {
        self.restored_summary = summary;
    }

    pub fn restored_summary(&self) -> Option<&Value> {
        self.restored_summary.as_ref()
    }

    /// Replace the schemas sent to the model; `None` reverts to the host's full set.
    pub fn set_tool_schema_override(&mut self, schemas: Option<Vec<ToolDefinition>>) {
        self.tool_schema_override = schemas;
    }

    pub fn set_tool_call_observer(&mut self, observer: Option<ToolCallObserver>) {
        self.observer = observer;
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    pub fn conversation_digest(&self) -> ConversationDigest {
        self.conversation.digest()
    }

    /// Forget the conversation and any restored summary.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.restored_summary = None;
    }

    /// Run one user turn to completion, collecting the final text.
    #[instrument(skip(self, text, host), fields(model = %self.model))]
    pub async fn send_message(
        &mut self,
        text: &str,
        mut host: Option<&mut dyn ToolHost>,
    ) -> Result<TurnOutcome> {
        self.begin_turn(text);

        for round in 0..self.limits.max_tool_rounds {
            let request = self.build_request(host.as_deref());
            let response = self.complete_with_retry(&request).await?;
            let calls = response_calls(&response);

            if calls.is_empty() {
                let reply = response.text();
                self.conversation.add_assistant_message(reply.clone());
                return Ok(TurnOutcome::Reply(reply));
            }

            debug!("round {}: {} tool call(s)", round + 1, calls.len());
            self.run_tool_calls(&response.text(), calls, host.as_deref_mut())
                .await;
        }

        Ok(self.round_limit_exceeded())
    }

    /// Like [`send_message`](Self::send_message) but forwards text fragments
    /// to `delta_tx` as they arrive. The returned outcome carries the full text.
    ///
    /// History is only updated once a response has fully arrived, so dropping
    /// this future mid-stream leaves no partial assistant message behind.
    #[instrument(skip(self, text, host, delta_tx), fields(model = %self.model))]
    pub async fn send_message_streaming(
        &mut self,
        text: &str,
        mut host: Option<&mut dyn ToolHost>,
        delta_tx: mpsc::Sender<String>,
    ) -> Result<TurnOutcome> {
        self.begin_turn(text);
        let mut full_response = String::new();

        for round in 0..self.limits.max_tool_rounds {
            let request = self.build_request(host.as_deref());

            let (round_text, calls) = match self.open_stream(&request).await {
                Ok(mut stream) => {
                    let mut round_text = String::new();
                    let mut fragments: BTreeMap<u32, PendingCall> = BTreeMap::new();
                    let mut finish_reason: Option<String> = None;

                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk?;
                        if chunk.stop_reason.is_some() {
                            finish_reason = chunk.stop_reason;
                        }
                        match chunk.delta {
                            StreamContent::Text(t) if !t.is_empty() => {
                                round_text.push_str(&t);
                                let _ = delta_tx.send(t).await;
                            }
                            StreamContent::Text(_) => {}
                            StreamContent::ToolCall(fragment) => {
                                let entry = fragments.entry(fragment.index).or_default();
                                if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                                    entry.id = id;
                                }
                                if let Some(name) = fragment.name {
                                    entry.name.push_str(&name);
                                }
                                entry.arguments.push_str(&fragment.arguments);
                            }
                        }
                    }

                    let calls = if finish_reason.as_deref() == Some("tool_calls") {
                        fragments.into_values().map(ensure_call_id).collect()
                    } else {
                        if !fragments.is_empty() {
                            warn!(
                                "dropping {} streamed tool call(s); finish reason was {:?}",
                                fragments.len(),
                                finish_reason
                            );
                        }
                        Vec::new()
                    };
                    (round_text, calls)
                }
                Err(stream_err) => {
                    warn!(
                        "streaming failed for provider '{}', falling back to non-streaming: {}",
                        self.provider.provider_id(),
                        stream_err
                    );
                    let response = self.complete_with_retry(&request).await?;
                    let round_text = response.text();
                    if !round_text.is_empty() {
                        let _ = delta_tx.send(round_text.clone()).await;
                    }
                    (round_text, response_calls(&response))
                }
            };

            full_response.push_str(&round_text);

            if calls.is_empty() {
                self.conversation.add_assistant_message(round_text);
                return Ok(TurnOutcome::Reply(full_response));
            }

            debug!("round {}: {} streamed tool call(s)", round + 1, calls.len());
            self.run_tool_calls(&round_text, calls, host.as_deref_mut())
                .await;
        }

        Ok(self.round_limit_exceeded())
    }

    fn begin_turn(&mut self, text: &str) {
        self.write_call_counts.clear();
        self.conversation.add_user_message(text);
    }

    fn round_limit_exceeded(&mut self) -> TurnOutcome {
        let outcome = TurnOutcome::RoundLimitExceeded {
            rounds: self.limits.max_tool_rounds,
        };
        warn!(
            "tool loop stopped after {} rounds without a text reply",
            self.limits.max_tool_rounds
        );
        self.conversation.add_assistant_message(outcome.text());
        outcome
    }

    fn build_request(&self, host: Option<&dyn ToolHost>) -> LlmRequest {
        let tools = match (&self.tool_schema_override, host) {
            (_, None) => Vec::new(),
            (Some(schemas), Some(_)) => schemas.clone(),
            (None, Some(host)) => host.tool_definitions(),
        };

        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        if let Some(summary) = &self.restored_summary {
            messages.push(ChatMessage::system(format!(
                "{RESTORED_SUMMARY_PREAMBLE}{summary}"
            )));
        }
        messages.extend(self.conversation.messages().iter().cloned());

        LlmRequest {
            model: self.model.clone(),
            messages,
            system: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools,
        }
    }

    async fn complete_with_retry(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let provider = Arc::clone(&self.provider);
        self.with_retry(|| provider.complete(request)).await
    }

    async fn open_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let provider = Arc::clone(&self.provider);
        self.with_retry(|| provider.stream_complete(request)).await
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_retryable_provider_error(&err) => {
                    attempt += 1;
                    warn!(
                        "provider '{}' failed with retryable error ({}); retry {}/{}",
                        self.provider.provider_id(),
                        err,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Record the assistant's tool-call turn, then execute each call in order
    /// and append its result.
    async fn run_tool_calls<'h>(
        &mut self,
        text: &str,
        calls: Vec<PendingCall>,
        mut host: Option<&mut (dyn ToolHost + 'h)>,
    ) {
        let blocks = calls
            .iter()
            .map(|call| ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input(),
                raw_arguments: Some(call.arguments.clone()),
            })
            .collect();
        self.conversation.add_assistant_tool_calls(text, blocks);

        for call in calls {
            let input = call.input();
            let result = match host.as_deref_mut() {
                None => json!({ "error": "No tool executor configured" }).to_string(),
                Some(host) => {
                    if let Some(observer) = &self.observer {
                        observer(&call.name, &input);
                    }
                    match self.check_loop_guard(&call.name, &input) {
                        Some(blocked) => blocked,
                        None => {
                            info!(tool = %call.name, "dispatching tool call");
                            host.dispatch(&call.name, input).await
                        }
                    }
                }
            };
            self.conversation.add_tool_result(&call.id, &result);
        }
    }

    /// Count identical calls to guarded tools; returns the refusal payload once
    /// the per-turn threshold is exceeded.
    fn check_loop_guard(&mut self, name: &str, input: &Value) -> Option<String> {
        if !self.limits.guarded_tools.iter().any(|t| t == name) {
            return None;
        }
        let signature = format!("{name}:{}", canonical_json(input));
        let count = self.write_call_counts.entry(signature).or_insert(0);
        *count += 1;
        if *count <= self.limits.loop_guard_threshold {
            return None;
        }
        warn!(tool = name, repeated_calls = *count, "loop guard blocked tool call");
        let payload = json!({
            "error": LOOP_GUARD_MESSAGE,
            "tool": name,
            "repeated_calls": *count,
        });
        Some(serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string()))
    }
}

fn response_calls(response: &LlmResponse) -> Vec<PendingCall> {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse {
                id,
                name,
                input,
                raw_arguments,
            } => Some(ensure_call_id(PendingCall {
                id: id.clone(),
                name: name.clone(),
                arguments: raw_arguments.clone().unwrap_or_else(|| input.to_string()),
            })),
            _ => None,
        })
        .collect()
}

fn ensure_call_id(mut call: PendingCall) -> PendingCall {
    if call.id.is_empty() {
        call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
    }
    call
}

/// Serialise with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sort(v))).collect();
                Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

fn is_retryable_provider_error(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();

    if let Some(status) = extract_status_code(&message) {
        return matches!(status, 429 | 500 | 502 | 503 | 504);
    }

    let retryable_fragments = [
        "timed out",
        "timeout",
        "connection refused",
        "connection reset",
        "connection closed",
        "temporarily unavailable",
        "dns error",
        "error sending request",
    ];

    retryable_fragments
        .iter()
        .any(|fragment| message.contains(fragment))
}

fn extract_status_code(message: &str) -> Option<u16> {
    let start = message.find("status=")? + "status=".len();
    let digits: String = message[start..]
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::providers::{LlmStreamResponse, ToolCallFragment};

    /// Replays a fixed list of responses; the last one repeats.
    struct ScriptedProvider {
        responses: Vec<LlmResponse>,
        calls: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<LlmRequest>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses,
                calls: Arc::new(AtomicUsize::new(0)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.responses[n.min(self.responses.len() - 1)].clone())
        }

        async fn stream_complete(&self, _request: &LlmRequest) -> Result<LlmStream> {
            Err(Error::Provider("streaming not supported".into()))
        }
    }

    /// Streams pre-built chunk lists, one list per request.
    struct ChunkProvider {
        rounds: Mutex<Vec<Vec<LlmStreamResponse>>>,
    }

    #[async_trait]
    impl LlmProvider for ChunkProvider {
        fn provider_id(&self) -> &str {
            "chunks"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
            Err(Error::Provider("status=400".into()))
        }

        async fn stream_complete(&self, _request: &LlmRequest) -> Result<LlmStream> {
            let chunks = self.rounds.lock().unwrap().remove(0);
            Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    struct RecordingHost {
        dispatched: Vec<(String, Value)>,
    }

    #[async_trait]
    impl ToolHost for RecordingHost {
        fn tool_definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "replace_text_in_file".into(),
                description: "edit".into(),
                input_schema: json!({"type": "object"}),
            }]
        }

        async fn dispatch(&mut self, name: &str, args: Value) -> String {
            self.dispatched.push((name.to_string(), args));
            json!({"status": "updated"}).to_string()
        }
    }

    fn tool_response(calls: &[(&str, Value)]) -> LlmResponse {
        LlmResponse {
            content: calls
                .iter()
                .enumerate()
                .map(|(i, (name, input))| ContentBlock::ToolUse {
                    id: format!("call_{i}"),
                    name: name.to_string(),
                    input: input.clone(),
                    raw_arguments: None,
                })
                .collect(),
            model: "m".into(),
            usage: None,
            stop_reason: Some("tool_calls".into()),
        }
    }

    fn text_response(text: &str) -> LlmResponse {
        LlmResponse {
            content: vec![ContentBlock::Text { text: text.into() }],
            model: "m".into(),
            usage: None,
            stop_reason: Some("stop".into()),
        }
    }

    fn text_chunk(text: &str, stop: Option<&str>) -> LlmStreamResponse {
        LlmStreamResponse {
            delta: StreamContent::Text(text.into()),
            usage: None,
            stop_reason: stop.map(String::from),
        }
    }

    fn fragment(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> LlmStreamResponse {
        LlmStreamResponse {
            delta: StreamContent::ToolCall(ToolCallFragment {
                index,
                id: id.map(String::from),
                name: name.map(String::from),
                arguments: args.into(),
            }),
            usage: None,
            stop_reason: None,
        }
    }

    #[tokio::test]
    async fn text_only_reply_ends_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("hello")]));
        let mut runtime = AgentRuntime::new(provider.clone(), "m");
        let outcome = runtime.send_message("hi", None).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Reply("hello".into()));
        assert_eq!(runtime.conversation().len(), 2);
        assert!(provider.requests.lock().unwrap()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_stay_in_history_verbatim() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            LlmResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "call_0".into(),
                    name: "replace_text_in_file".into(),
                    input: json!({}),
                    raw_arguments: Some("{\"filename\": \"a.py\",".into()),
                }],
                model: "m".into(),
                usage: None,
                stop_reason: Some("tool_calls".into()),
            },
            text_response("done"),
        ]));
        let mut runtime = AgentRuntime::new(provider, "m");
        let mut host = RecordingHost { dispatched: Vec::new() };
        runtime.send_message("edit", Some(&mut host)).await.unwrap();

        assert_eq!(host.dispatched[0].1, json!({}));
        let recorded = runtime
            .conversation()
            .messages()
            .iter()
            .find_map(|m| match &m.content {
                crate::providers::MessagePart::Parts(parts) => parts.iter().find_map(|p| match p {
                    ContentBlock::ToolUse { raw_arguments, .. } => raw_arguments.clone(),
                    _ => None,
                }),
                _ => None,
            });
        assert_eq!(recorded.as_deref(), Some("{\"filename\": \"a.py\","));
    }

    #[tokio::test]
    async fn loop_guard_blocks_third_identical_edit() {
        let edit = json!({"filename": "a.py", "old_text": "x", "new_text": "y"});
        let other = json!({"filename": "a.py", "old_text": "x", "new_text": "z"});
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(&[
                ("replace_text_in_file", edit.clone()),
                ("replace_text_in_file", edit.clone()),
                ("replace_text_in_file", edit.clone()),
                ("replace_text_in_file", other.clone()),
            ]),
            text_response("done"),
        ]));
        let mut runtime = AgentRuntime::new(provider, "m");
        let mut host = RecordingHost { dispatched: Vec::new() };

        let outcome = runtime.send_message("fix it", Some(&mut host)).await.unwrap();
        assert_eq!(outcome.text(), "done");
        assert_eq!(host.dispatched.len(), 3);
        assert_eq!(host.dispatched[2].1, other);

        let blocked = runtime
            .conversation()
            .messages()
            .iter()
            .find(|m| format!("{:?}", m.content).contains("Loop guard"))
            .expect("loop guard result recorded");
        assert!(format!("{:?}", blocked.content).contains("repeated_calls"));
    }

    #[tokio::test]
    async fn loop_guard_resets_each_turn() {
        let edit = json!({"filename": "a.py", "old_text": "x", "new_text": "y"});
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(&[("replace_text_in_file", edit.clone()), ("replace_text_in_file", edit.clone())]),
            text_response("one"),
            tool_response(&[("replace_text_in_file", edit.clone()), ("replace_text_in_file", edit.clone())]),
            text_response("two"),
        ]));
        let mut runtime = AgentRuntime::new(provider, "m");
        let mut host = RecordingHost { dispatched: Vec::new() };
        runtime.send_message("a", Some(&mut host)).await.unwrap();
        runtime.send_message("b", Some(&mut host)).await.unwrap();
        assert_eq!(host.dispatched.len(), 4);
    }

    #[tokio::test]
    async fn round_cap_returns_distinct_outcome() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(&[(
            "get_all_locals",
            json!({}),
        )])]));
        let calls = Arc::clone(&provider.calls);
        let mut runtime = AgentRuntime::new(provider, "m").with_limits(RuntimeLimits {
            max_tool_rounds: 3,
            ..RuntimeLimits::default()
        });
        let mut host = RecordingHost { dispatched: Vec::new() };
        let outcome = runtime.send_message("loop", Some(&mut host)).await.unwrap();
        assert_eq!(outcome, TurnOutcome::RoundLimitExceeded { rounds: 3 });
        assert!(outcome.text().contains("too many tool-call rounds"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn observer_sees_every_dispatch() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(&[("get_all_locals", json!({"frame_index": 1}))]),
            text_response("ok"),
        ]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut runtime = AgentRuntime::new(provider, "m");
        runtime.set_tool_call_observer(Some(Box::new(move |name, args| {
            sink.lock().unwrap().push((name.to_string(), args.clone()));
        })));
        let mut host = RecordingHost { dispatched: Vec::new() };
        runtime.send_message("x", Some(&mut host)).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["frame_index"], 1);
    }

    #[tokio::test]
    async fn restored_summary_and_override_shape_the_request() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("ok")]));
        let requests = Arc::clone(&provider.requests);
        let mut runtime = AgentRuntime::new(provider, "m");
        runtime.set_system_prompt("base prompt");
        runtime.set_restored_summary(Some(json!({"message_count": 4})));
        runtime.set_tool_schema_override(Some(vec![]));
        let mut host = RecordingHost { dispatched: Vec::new() };
        runtime.send_message("x", Some(&mut host)).await.unwrap();

        let request = &requests.lock().unwrap()[0];
        assert_eq!(request.system.as_deref(), Some("base prompt"));
        assert!(request.tools.is_empty());
        let first = request.messages[0].text();
        assert!(first.starts_with("Restored session summary from previous run."));
        assert!(first.contains("\"message_count\":4"));
    }

    #[tokio::test]
    async fn streaming_accumulates_fragments_by_index() {
        let provider = Arc::new(ChunkProvider {
            rounds: Mutex::new(vec![
                vec![
                    text_chunk("Looking", None),
                    fragment(0, Some("call_a"), Some("replace_text"), "{\"filename\":"),
                    fragment(1, Some("call_b"), Some("replace_text_in_file"), "{}"),
                    fragment(0, None, Some("_in_file"), " \"a.py\"}"),
                    text_chunk("", Some("tool_calls")),
                ],
                vec![text_chunk(" done", Some("stop"))],
            ]),
        });
        let mut runtime = AgentRuntime::new(provider, "m");
        let mut host = RecordingHost { dispatched: Vec::new() };
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = runtime
            .send_message_streaming("go", Some(&mut host), tx)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Reply("Looking done".into()));
        assert_eq!(host.dispatched.len(), 2);
        assert_eq!(host.dispatched[0].0, "replace_text_in_file");
        assert_eq!(host.dispatched[0].1, json!({"filename": "a.py"}));

        let mut deltas = Vec::new();
        while let Ok(d) = rx.try_recv() {
            deltas.push(d);
        }
        assert_eq!(deltas, vec!["Looking".to_string(), " done".to_string()]);
    }

    #[tokio::test]
    async fn streaming_malformed_arguments_degrade_to_empty() {
        let provider = Arc::new(ChunkProvider {
            rounds: Mutex::new(vec![
                vec![
                    fragment(0, Some("c"), Some("get_all_locals"), "{bad"),
                    text_chunk("", Some("tool_calls")),
                ],
                vec![text_chunk("ok", Some("stop"))],
            ]),
        });
        let mut runtime = AgentRuntime::new(provider, "m");
        let mut host = RecordingHost { dispatched: Vec::new() };
        let (tx, _rx) = mpsc::channel(16);
        runtime
            .send_message_streaming("go", Some(&mut host), tx)
            .await
            .unwrap();
        assert_eq!(host.dispatched[0].1, json!({}));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": 1, "y": 2}});
        assert_eq!(canonical_json(&a), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn retryable_error_classifier_matches_expected_cases() {
        assert!(is_retryable_provider_error(&Error::Provider(
            "API error: status=429, body=rate limit".to_string()
        )));
        assert!(is_retryable_provider_error(&Error::Provider(
            "request failed: operation timed out".to_string()
        )));
        assert!(!is_retryable_provider_error(&Error::Provider(
            "API error: status=401, body=bad key".to_string()
        )));
    }
}
