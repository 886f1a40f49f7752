use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::tutor::planner::{PlanEventSink, PlanRequest, Planner, PlannerError, ToolBridge};

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    CallTool { name: String, input: Value },
    Fail(String),
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn call(name: impl Into<String>, input: Value) -> Self {
        Self::CallTool {
            name: name.into(),
            input,
        }
    }
}

/// Plays fixed steps. With several turns queued, each `plan` call consumes one;
/// the last turn repeats once the queue is down to it.
pub struct ScriptedPlanner {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::turns(vec![steps])
    }

    pub fn turns(turns: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
        }
    }

    /// Stand-in used when no planner endpoint is configured.
    pub fn unconfigured() -> Self {
        Self::new(Vec::new())
    }

    fn next_turn(&self) -> Vec<ScriptStep> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        if turns.len() > 1 {
            turns.pop_front().unwrap_or_default()
        } else {
            turns.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        request: PlanRequest,
        tools: &ToolBridge,
        events: &PlanEventSink,
    ) -> Result<(), PlannerError> {
        let steps = self.next_turn();
        if steps.is_empty() {
            events.text(request.language.pick(
                "المساعد الذكي غير مهيأ حاليًا. يرجى المحاولة لاحقًا.",
                "The tutor model is not configured yet. Please try again later.",
            ));
            return Ok(());
        }
        for step in steps {
            match step {
                ScriptStep::Text(text) => events.text(text.as_str()),
                ScriptStep::CallTool { name, input } => {
                    tools.call(None, name.as_str(), input).await;
                }
                ScriptStep::Fail(message) => return Err(PlannerError::Transport(message)),
            }
        }
        Ok(())
    }
}
