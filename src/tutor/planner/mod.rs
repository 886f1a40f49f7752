pub mod openai;
pub mod scripted;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::i18n::Language;
use crate::tutor::context::StudentContext;
use crate::tutor::protocol::{StreamEvent, TranscriptMessage};
use crate::tutor::tools::{ToolDefinition, ToolExecutor, ToolOutcome};

pub use openai::OpenAiCompatiblePlanner;
pub use scripted::{ScriptStep, ScriptedPlanner};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner transport failed: {0}")]
    Transport(String),
    #[error("planner protocol error: {0}")]
    Protocol(String),
    #[error("planner is not configured: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub system_prompt: String,
    pub transcript: Vec<TranscriptMessage>,
    pub language: Language,
}

/// Decides what to say and which tools to call for one turn.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        request: PlanRequest,
        tools: &ToolBridge,
        events: &PlanEventSink,
    ) -> Result<(), PlannerError>;
}

/// Message from a running planner task to the turn stream.
#[derive(Debug)]
pub enum PlanSignal {
    Event(StreamEvent),
    Done(Result<(), PlannerError>),
}

/// Text side of the event stream. Deltas are grouped into text blocks.
#[derive(Clone)]
pub struct PlanEventSink {
    tx: UnboundedSender<PlanSignal>,
    open_text: Arc<Mutex<Option<String>>>,
}

impl PlanEventSink {
    pub fn new(tx: UnboundedSender<PlanSignal>) -> Self {
        Self {
            tx,
            open_text: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emit(&self, event: StreamEvent) {
        // The receiver is gone once the client disconnects.
        let _ = self.tx.send(PlanSignal::Event(event));
    }

    pub fn text(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let id = {
            let mut open = self.open_text.lock().unwrap_or_else(|e| e.into_inner());
            match open.as_ref() {
                Some(id) => id.clone(),
                None => {
                    let id = format!("text_{}", Uuid::new_v4().simple());
                    *open = Some(id.clone());
                    self.emit(StreamEvent::TextStart { id: id.clone() });
                    id
                }
            }
        };
        self.emit(StreamEvent::TextDelta {
            id,
            delta: delta.to_string(),
        });
    }

    pub fn close_text(&self) {
        let closed = self
            .open_text
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = closed {
            self.emit(StreamEvent::TextEnd { id });
        }
    }

    pub fn finish(&self, result: Result<(), PlannerError>) {
        self.close_text();
        let _ = self.tx.send(PlanSignal::Done(result));
    }
}

/// Tool access for the planner, bound to one student.
pub struct ToolBridge {
    executor: ToolExecutor,
    student: StudentContext,
    events: PlanEventSink,
}

impl ToolBridge {
    pub fn new(executor: ToolExecutor, student: StudentContext, events: PlanEventSink) -> Self {
        Self {
            executor,
            student,
            events,
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.executor.catalog().definitions()
    }

    pub fn student(&self) -> &StudentContext {
        &self.student
    }

    /// Runs one tool call and emits its lifecycle events. Always returns a JSON
    /// value for the planner, `{"error": ...}` on failure.
    pub async fn call(&self, tool_call_id: Option<String>, name: &str, input: Value) -> Value {
        let tool_call_id = self.announce(tool_call_id, name, input.clone());
        match self.executor.execute(&self.student, name, input).await {
            ToolOutcome::Success(output) => {
                self.events.emit(StreamEvent::ToolOutputAvailable {
                    tool_call_id,
                    output: output.clone(),
                });
                output
            }
            ToolOutcome::Failure { error } => self.fail(tool_call_id, error),
        }
    }

    /// Reports a call whose arguments could not be read. The tool does not run.
    pub fn reject(
        &self,
        tool_call_id: Option<String>,
        name: &str,
        raw_arguments: &str,
        error: String,
    ) -> Value {
        let tool_call_id =
            self.announce(tool_call_id, name, Value::String(raw_arguments.to_string()));
        self.fail(tool_call_id, error)
    }

    fn announce(&self, tool_call_id: Option<String>, name: &str, input: Value) -> String {
        let tool_call_id =
            tool_call_id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        self.events.close_text();
        self.events.emit(StreamEvent::ToolInputStart {
            tool_call_id: tool_call_id.clone(),
            tool_name: name.to_string(),
        });
        self.events.emit(StreamEvent::ToolInputAvailable {
            tool_call_id: tool_call_id.clone(),
            tool_name: name.to_string(),
            input,
        });
        tool_call_id
    }

    fn fail(&self, tool_call_id: String, error: String) -> Value {
        self.events.emit(StreamEvent::ToolOutputError {
            tool_call_id,
            error_text: error.clone(),
        });
        ToolOutcome::Failure { error }.into_planner_value()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::i18n::Language;
    use crate::tutor::tools::test_support::fixture;

    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<PlanSignal>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            if let PlanSignal::Event(event) = signal {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn rejected_call_reports_an_error_without_running_the_tool() {
        let fx = fixture(Language::En);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = ToolBridge::new(fx.executor(), fx.student.clone(), PlanEventSink::new(tx));

        let output = bridge.reject(
            Some(String::from("call_1")),
            "create_homework_assignment",
            "{difficulty_level: easy",
            String::from("Tool arguments were not valid JSON: key must be a string"),
        );
        assert_eq!(
            output["error"],
            "Tool arguments were not valid JSON: key must be a string"
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            StreamEvent::ToolInputAvailable { input: Value::String(raw), .. } if raw == "{difficulty_level: easy"
        ));
        assert!(matches!(
            &events[2],
            StreamEvent::ToolOutputError { tool_call_id, .. } if tool_call_id == "call_1"
        ));
        assert!(fx
            .store
            .list_tool_logs(fx.student.student_id.as_str(), 10)
            .expect("logs")
            .is_empty());
    }

    #[tokio::test]
    async fn text_is_closed_before_a_tool_call() {
        let fx = fixture(Language::En);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PlanEventSink::new(tx);
        let bridge = ToolBridge::new(fx.executor(), fx.student.clone(), sink.clone());

        sink.text("One ");
        sink.text("moment.");
        let output = bridge.call(None, "get_student_profile", serde_json::json!({})).await;
        assert!(output.get("error").is_none(), "{output}");

        let kinds = drain(&mut rx)
            .iter()
            .map(|event| match event {
                StreamEvent::TextStart { .. } => "text-start",
                StreamEvent::TextDelta { .. } => "text-delta",
                StreamEvent::TextEnd { .. } => "text-end",
                StreamEvent::ToolInputStart { .. } => "tool-input-start",
                StreamEvent::ToolInputAvailable { .. } => "tool-input-available",
                StreamEvent::ToolOutputAvailable { .. } => "tool-output-available",
                _ => "other",
            })
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "tool-input-start",
                "tool-input-available",
                "tool-output-available",
            ]
        );
    }
}
