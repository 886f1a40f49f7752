//! Stream events sent to the chat client and the message parts it sends back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        message_id: String,
        message_metadata: MessageMetadata,
    },
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    #[serde(rename_all = "camelCase")]
    ToolInputStart { tool_call_id: String, tool_name: String },
    #[serde(rename_all = "camelCase")]
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputAvailable { tool_call_id: String, output: Value },
    #[serde(rename_all = "camelCase")]
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },
    #[serde(rename_all = "camelCase")]
    Finish { message_metadata: MessageMetadata },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageMetadata {
    pub conversation_id: String,
}

impl StreamEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"type":"error"}"#))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Client message: `{id, role, parts[]}`, or the older `{role, content}` shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Value>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ClientMessage {
    pub fn text(&self) -> String {
        let from_parts = self
            .parts
            .iter()
            .filter(|p| part_type(p) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if from_parts.trim().is_empty() {
            self.content.clone().unwrap_or_default()
        } else {
            from_parts
        }
    }
}

fn part_type(part: &Value) -> Option<&str> {
    part.get("type").and_then(Value::as_str)
}

fn is_terminal_tool_part(part: &Value) -> bool {
    let is_tool = part_type(part).is_some_and(|t| t.starts_with("tool-"));
    let state = part.get("state").and_then(Value::as_str);
    is_tool && matches!(state, Some("output-available") | Some("output-error"))
}

/// Keeps text parts and finished tool parts; UI-only parts are dropped.
pub fn planner_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .filter(|p| part_type(p) == Some("text") || is_terminal_tool_part(p))
        .cloned()
        .collect()
}

/// A prior turn as the planner sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
    pub tool_parts: Vec<Value>,
}

pub fn to_transcript(messages: &[ClientMessage]) -> Vec<TranscriptMessage> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .filter_map(|m| {
            let parts = planner_parts(&m.parts);
            let content = m.text();
            let tool_parts = parts
                .into_iter()
                .filter(is_terminal_tool_part)
                .collect::<Vec<_>>();
            if content.trim().is_empty() && tool_parts.is_empty() {
                None
            } else {
                Some(TranscriptMessage {
                    role: m.role,
                    content,
                    tool_parts,
                })
            }
        })
        .collect()
}

/// Latest user message with text, with its client id.
pub fn latest_user_text(messages: &[ClientMessage]) -> Option<(Option<String>, String)> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .map(|m| (m.id.clone(), m.text()))
        .find(|(_, text)| !text.trim().is_empty())
}

#[derive(Debug, Clone)]
struct PendingTool {
    tool_call_id: String,
    tool_name: String,
    input: Value,
}

/// Folds forwarded events into the assistant message that gets persisted.
#[derive(Debug, Default)]
pub struct TranscriptBuilder {
    text: String,
    pending: Vec<PendingTool>,
    tool_parts: Vec<Value>,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { delta, .. } => self.text.push_str(delta),
            StreamEvent::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => self.pending.push(PendingTool {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                input: input.clone(),
            }),
            StreamEvent::ToolOutputAvailable {
                tool_call_id,
                output,
            } => {
                if let Some(tool) = self.take_pending(tool_call_id) {
                    self.tool_parts.push(json!({
                        "type": format!("tool-{}", tool.tool_name),
                        "toolCallId": tool.tool_call_id,
                        "state": "output-available",
                        "input": tool.input,
                        "output": output,
                    }));
                }
            }
            StreamEvent::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                if let Some(tool) = self.take_pending(tool_call_id) {
                    self.tool_parts.push(json!({
                        "type": format!("tool-{}", tool.tool_name),
                        "toolCallId": tool.tool_call_id,
                        "state": "output-error",
                        "input": tool.input,
                        "errorText": error_text,
                    }));
                }
            }
            _ => {}
        }
    }

    fn take_pending(&mut self, tool_call_id: &str) -> Option<PendingTool> {
        let idx = self
            .pending
            .iter()
            .position(|p| p.tool_call_id == tool_call_id)?;
        Some(self.pending.remove(idx))
    }

    /// Concatenated text and terminal tool parts; unfinished calls are dropped.
    pub fn finish(self) -> (String, Vec<Value>) {
        (self.text, self.tool_parts)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn events_serialize_with_client_field_names() {
        let event = StreamEvent::ToolOutputError {
            tool_call_id: String::from("c1"),
            error_text: String::from("nope"),
        };
        assert_eq!(
            serde_json::to_value(&event).expect("json"),
            json!({"type": "tool-output-error", "toolCallId": "c1", "errorText": "nope"})
        );
        let finish = StreamEvent::Finish {
            message_metadata: MessageMetadata {
                conversation_id: String::from("conv"),
            },
        };
        assert_eq!(
            finish.to_json(),
            r#"{"type":"finish","messageMetadata":{"conversation_id":"conv"}}"#
        );
        let start = StreamEvent::Start {
            message_id: String::from("m1"),
            message_metadata: MessageMetadata {
                conversation_id: String::from("conv"),
            },
        };
        assert_eq!(
            start.to_json(),
            r#"{"type":"start","messageId":"m1","messageMetadata":{"conversation_id":"conv"}}"#
        );
        assert_eq!(
            StreamEvent::TextDelta {
                id: String::from("t"),
                delta: String::from("hi"),
            }
            .to_json(),
            r#"{"type":"text-delta","id":"t","delta":"hi"}"#
        );
    }

    #[test]
    fn only_text_and_finished_tool_parts_reach_the_planner() {
        let message: ClientMessage = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "parts": [
                {"type": "step-start"},
                {"type": "reasoning", "text": "thinking"},
                {"type": "text", "text": "Here you go"},
                {"type": "tool-search_lessons", "toolCallId": "a", "state": "input-streaming"},
                {"type": "tool-search_lessons", "toolCallId": "b", "state": "output-available", "output": {}},
                {"type": "data-progress", "data": 1},
                {"type": "file", "url": "x"}
            ]
        }))
        .expect("message");
        let kept = planner_parts(&message.parts);
        assert_eq!(kept.len(), 2);
        let transcript = to_transcript(&[message]);
        assert_eq!(transcript[0].content, "Here you go");
        assert_eq!(transcript[0].tool_parts[0]["toolCallId"], "b");
    }

    #[test]
    fn legacy_content_messages_are_accepted() {
        let messages: Vec<ClientMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "مرحبا"},
            {"role": "assistant", "content": "أهلا"},
            {"role": "user", "parts": [{"type": "text", "text": "أريد تمارين جمع"}]},
            {"role": "user", "parts": [{"type": "file", "url": "x"}]}
        ]))
        .expect("messages");
        assert_eq!(
            latest_user_text(&messages),
            Some((None, String::from("أريد تمارين جمع")))
        );
        assert_eq!(to_transcript(&messages).len(), 3);
    }

    #[test]
    fn builder_keeps_only_terminal_tool_states() {
        let mut builder = TranscriptBuilder::new();
        for event in [
            StreamEvent::TextDelta {
                id: String::from("t1"),
                delta: String::from("Let me check. "),
            },
            StreamEvent::ToolInputStart {
                tool_call_id: String::from("c1"),
                tool_name: String::from("get_student_profile"),
            },
            StreamEvent::ToolInputAvailable {
                tool_call_id: String::from("c1"),
                tool_name: String::from("get_student_profile"),
                input: json!({}),
            },
            StreamEvent::ToolOutputAvailable {
                tool_call_id: String::from("c1"),
                output: json!({"grade_level": 3}),
            },
            StreamEvent::ToolInputAvailable {
                tool_call_id: String::from("c2"),
                tool_name: String::from("search_lessons"),
                input: json!({"query": "x"}),
            },
            StreamEvent::TextDelta {
                id: String::from("t2"),
                delta: String::from("Done."),
            },
        ] {
            builder.observe(&event);
        }
        let (text, parts) = builder.finish();
        assert_eq!(text, "Let me check. Done.");
        assert_eq!(
            parts,
            vec![json!({
                "type": "tool-get_student_profile",
                "toolCallId": "c1",
                "state": "output-available",
                "input": {},
                "output": {"grade_level": 3},
            })]
        );
    }
}
