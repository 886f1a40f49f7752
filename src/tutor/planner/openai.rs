use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::settings::PlannerSettings;
use crate::tutor::planner::{PlanEventSink, PlanRequest, Planner, PlannerError, ToolBridge};
use crate::tutor::protocol::{Role, TranscriptMessage};
use crate::tutor::tools::ToolDefinition;

const TOOL_RESULT_NOTE_CHARS: usize = 1500;
const MAX_CALLS_PER_ROUND: usize = 32;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// One streamed completion once every chunk has arrived.
#[derive(Debug, Default)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Vec<CompletionToolCall>,
}

#[derive(Debug, Clone, Default)]
struct CompletionToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds `chat.completion.chunk` SSE frames into text deltas and whole tool
/// calls. Input is raw bytes; lines are only decoded once complete, so a
/// multi-byte character split across network chunks stays intact.
#[derive(Debug, Default)]
struct StreamAccumulator {
    buffer: Vec<u8>,
    content: String,
    calls: Vec<CompletionToolCall>,
    done: bool,
}

impl StreamAccumulator {
    /// Returns the text deltas carried by the lines this chunk completed.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, PlannerError> {
        self.buffer.extend_from_slice(bytes);
        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            if let Some(delta) = self.accept_line(String::from_utf8_lossy(&line).trim())? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    /// Handles a final line that arrived without a trailing newline.
    fn flush(&mut self) -> Result<Vec<String>, PlannerError> {
        let rest = std::mem::take(&mut self.buffer);
        Ok(self
            .accept_line(String::from_utf8_lossy(&rest).trim())?
            .into_iter()
            .collect())
    }

    fn accept_line(&mut self, line: &str) -> Result<Option<String>, PlannerError> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Ok(None);
        };
        if data.is_empty() {
            return Ok(None);
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        let chunk = match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(%error, "skipping unparseable planner stream chunk");
                return Ok(None);
            }
        };
        if let Some(error) = chunk.error {
            return Err(PlannerError::Protocol(format!("stream error: {error}")));
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };
        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            if fragment.index >= MAX_CALLS_PER_ROUND {
                return Err(PlannerError::Protocol(format!(
                    "tool call index {} out of range",
                    fragment.index
                )));
            }
            if self.calls.len() <= fragment.index {
                self.calls
                    .resize_with(fragment.index + 1, CompletionToolCall::default);
            }
            let call = &mut self.calls[fragment.index];
            if let Some(id) = fragment.id {
                call.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    call.name.push_str(name.as_str());
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(arguments.as_str());
                }
            }
        }
        match choice.delta.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(text.as_str());
                Ok(Some(text))
            }
            _ => Ok(None),
        }
    }

    fn into_message(self) -> CompletionMessage {
        let tool_calls = self
            .calls
            .into_iter()
            .enumerate()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{index}");
                }
                call
            })
            .collect();
        CompletionMessage {
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls,
        }
    }
}

/// Tool arguments as JSON. An empty string means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str::<Value>(raw).map_err(|e| format!("Tool arguments were not valid JSON: {e}"))
}

/// Function-calling planner for any `/chat/completions` endpoint.
pub struct OpenAiCompatiblePlanner {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tool_rounds: usize,
}

impl OpenAiCompatiblePlanner {
    pub fn from_settings(settings: &PlannerSettings) -> Result<Self, PlannerError> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| PlannerError::Configuration(String::from("planner base_url is not set")))?
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| PlannerError::Configuration(format!("failed to build HTTP client: {e}")))?;
        info!(base_url = %base_url, model = %settings.model, "planner configured");
        Ok(Self {
            client,
            base_url,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            max_tool_rounds: settings.max_tool_rounds.max(1),
        })
    }

    /// Streams one completion, forwarding text as it arrives.
    async fn complete(
        &self,
        messages: &[Value],
        tools: &[Value],
        allow_tools: bool,
        events: &PlanEventSink,
    ) -> Result<CompletionMessage, PlannerError> {
        let body = CompletionRequest {
            model: self.model.as_str(),
            messages,
            tools: (!tools.is_empty()).then(|| tools.to_vec()),
            tool_choice: (!tools.is_empty()).then_some(if allow_tools { "auto" } else { "none" }),
            stream: true,
        };
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                PlannerError::Transport(format!("cannot connect to {}", self.base_url))
            } else {
                PlannerError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PlannerError::Protocol(format!(
                "status {status}: {}",
                text.chars().take(300).collect::<String>()
            )));
        }

        let mut accumulator = StreamAccumulator::default();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk =
                chunk.map_err(|e| PlannerError::Transport(format!("stream interrupted: {e}")))?;
            for delta in accumulator.push(chunk.as_ref())? {
                events.text(delta.as_str());
            }
            if accumulator.done {
                break;
            }
        }
        for delta in accumulator.flush()? {
            events.text(delta.as_str());
        }
        Ok(accumulator.into_message())
    }
}

fn tool_specs(definitions: &[ToolDefinition]) -> Vec<Value> {
    definitions
        .iter()
        .map(|def| {
            json!({
                "type": "function",
                "function": {
                    "name": def.name,
                    "description": def.description,
                    "parameters": def.parameters,
                }
            })
        })
        .collect()
}

/// System prompt plus prior turns. Earlier tool results are folded into the
/// assistant text since their call ids are not replayed.
fn initial_messages(request: &PlanRequest) -> Vec<Value> {
    let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
    for message in &request.transcript {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => continue,
        };
        messages.push(json!({"role": role, "content": transcript_content(message)}));
    }
    messages
}

fn transcript_content(message: &TranscriptMessage) -> String {
    let mut content = message.content.clone();
    for part in &message.tool_parts {
        let name = part
            .get("type")
            .and_then(Value::as_str)
            .and_then(|t| t.strip_prefix("tool-"))
            .unwrap_or("tool");
        let result = part
            .get("output")
            .map(Value::to_string)
            .or_else(|| part.get("errorText").map(Value::to_string))
            .unwrap_or_default();
        let result = result.chars().take(TOOL_RESULT_NOTE_CHARS).collect::<String>();
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(format!("[{name} result] {result}").as_str());
    }
    content
}

#[async_trait]
impl Planner for OpenAiCompatiblePlanner {
    async fn plan(
        &self,
        request: PlanRequest,
        tools: &ToolBridge,
        events: &PlanEventSink,
    ) -> Result<(), PlannerError> {
        let specs = tool_specs(&tools.definitions());
        let mut messages = initial_messages(&request);

        for round in 0..=self.max_tool_rounds {
            let allow_tools = round < self.max_tool_rounds;
            let reply = self.complete(&messages, &specs, allow_tools, events).await?;
            if reply.tool_calls.is_empty() || !allow_tools {
                return Ok(());
            }

            debug!(round, calls = reply.tool_calls.len(), "planner requested tools");
            messages.push(json!({
                "role": "assistant",
                "content": reply.content,
                "tool_calls": reply
                    .tool_calls
                    .iter()
                    .map(|call| json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments},
                    }))
                    .collect::<Vec<_>>(),
            }));
            for call in reply.tool_calls {
                let output = match parse_arguments(call.arguments.as_str()) {
                    Ok(input) => {
                        tools
                            .call(Some(call.id.clone()), call.name.as_str(), input)
                            .await
                    }
                    Err(error) => {
                        warn!(tool = %call.name, %error, "planner sent malformed tool arguments");
                        tools.reject(
                            Some(call.id.clone()),
                            call.name.as_str(),
                            call.arguments.as_str(),
                            error,
                        )
                    }
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output.to_string(),
                }));
            }
        }
        warn!("planner stopped after exhausting tool rounds");
        Ok(())
    }
}
