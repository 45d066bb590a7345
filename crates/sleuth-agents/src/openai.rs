use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sleuth_common::{Error, Result};

use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream,
    LlmStreamResponse, MessagePart, StreamContent, ToolCallFragment, Usage,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Provider for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    async fn post(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "API error: status={}, body={}",
                status.as_u16(),
                body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = convert_request(request, false)?;
        let response = self.post(&body).await?;
        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("failed to parse response: {e}")))?;
        convert_response(parsed)
    }

    async fn stream_complete(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = convert_request(request, true)?;
        let response = self.post(&body).await?;
        Ok(Box::pin(SseStream::new(response.bytes_stream())))
    }
}

fn convert_request(request: &LlmRequest, stream: bool) -> Result<OpenAiRequest> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(OpenAiMessage::System {
            content: system.clone(),
        });
    }
    for msg in &request.messages {
        messages.push(convert_message(msg)?);
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function".to_string(),
                    function: OpenAiFunctionDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect(),
        )
    };
    let tool_choice = tools.as_ref().map(|_| "auto".to_string());

    Ok(OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools,
        tool_choice,
        stream,
    })
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    match msg.role {
        ChatRole::System => Ok(OpenAiMessage::System {
            content: msg.text(),
        }),
        ChatRole::User => Ok(OpenAiMessage::User {
            content: msg.text(),
        }),
        ChatRole::Assistant => {
            let mut tool_calls = Vec::new();
            if let MessagePart::Parts(parts) = &msg.content {
                for part in parts {
                    if let ContentBlock::ToolUse {
                        id,
                        name,
                        input,
                        raw_arguments,
                    } = part
                    {
                        let arguments = match raw_arguments {
                            Some(raw) => raw.clone(),
                            None => serde_json::to_string(input)?,
                        };
                        tool_calls.push(OpenAiToolCall {
                            id: id.clone(),
                            kind: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: name.clone(),
                                arguments,
                            },
                        });
                    }
                }
            }
            let text = msg.text();
            Ok(OpenAiMessage::Assistant {
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            })
        }
        ChatRole::Tool => {
            let MessagePart::Parts(parts) = &msg.content else {
                return Err(Error::Provider(
                    "tool message must carry a tool_result block".to_string(),
                ));
            };
            parts
                .iter()
                .find_map(|p| match p {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => Some(OpenAiMessage::Tool {
                        tool_call_id: tool_use_id.clone(),
                        content: content.clone(),
                    }),
                    _ => None,
                })
                .ok_or_else(|| {
                    Error::Provider("tool message missing tool_result block".to_string())
                })
        }
    }
}

fn convert_response(response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Provider("no choices in response".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(ContentBlock::Text { text });
    }
    for tc in choice.message.tool_calls.unwrap_or_default() {
        content.push(ContentBlock::ToolUse {
            id: tc.id,
            name: tc.function.name,
            input: parse_arguments(&tc.function.arguments),
            raw_arguments: Some(tc.function.arguments),
        });
    }

    Ok(LlmResponse {
        content,
        model: response.model,
        usage: response.usage.map(Usage::from),
        stop_reason: choice.finish_reason,
    })
}

/// Parse a tool-call argument string. Anything that is not a JSON object
/// degrades to an empty object.
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(serde_json::Map::new()),
    }
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

// Request types

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: OpenAiFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// Streaming

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

/// Splits a server-sent-event byte stream into `data:` payloads.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the `data:` payloads of every completed event.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some((end, delim_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + delim_len).collect();
            payloads.extend(event_payloads(&event[..end]));
        }
        payloads
    }

    /// Flush whatever is left when the byte stream ends without a trailing blank line.
    fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_payloads(&rest)
    }
}

fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn event_payloads(event: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(event);
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
        .filter(|data| !data.is_empty() && data != "[DONE]")
        .collect()
}

/// Convert one `data:` payload into stream responses.
fn decode_chunk(data: &str) -> Vec<Result<LlmStreamResponse>> {
    let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return vec![Err(Error::Provider(format!(
                "malformed stream chunk: {e}"
            )))];
        }
    };

    let mut out = Vec::new();
    for choice in chunk.choices {
        let mut emitted = false;
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            out.push(Ok(LlmStreamResponse {
                delta: StreamContent::Text(text),
                usage: None,
                stop_reason: None,
            }));
            emitted = true;
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            out.push(Ok(LlmStreamResponse {
                delta: StreamContent::ToolCall(ToolCallFragment {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                }),
                usage: None,
                stop_reason: None,
            }));
            emitted = true;
        }
        if let Some(reason) = choice.finish_reason {
            match out.last_mut() {
                Some(Ok(last)) if emitted => last.stop_reason = Some(reason),
                _ => out.push(Ok(LlmStreamResponse {
                    delta: StreamContent::Text(String::new()),
                    usage: None,
                    stop_reason: Some(reason),
                })),
            }
        }
    }
    if let Some(usage) = chunk.usage {
        out.push(Ok(LlmStreamResponse {
            delta: StreamContent::Text(String::new()),
            usage: Some(usage.into()),
            stop_reason: None,
        }));
    }
    out
}

struct SseStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decoder: SseDecoder,
    queue: VecDeque<Result<LlmStreamResponse>>,
    done: bool,
}

impl SseStream {
    fn new(inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(inner),
            decoder: SseDecoder::default(),
            queue: VecDeque::new(),
            done: false,
        }
    }

    fn enqueue(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            self.queue.extend(decode_chunk(&payload));
        }
    }
}

impl Stream for SseStream {
    type Item = Result<LlmStreamResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.done {
                return Poll::Ready(None);
            }
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let payloads = self.decoder.push(&bytes);
                    self.enqueue(payloads);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(Error::Provider(format!("stream error: {e}")))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    let payloads = self.decoder.finish();
                    self.enqueue(payloads);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
