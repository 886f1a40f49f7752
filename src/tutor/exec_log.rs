use serde_json::Value;
use tracing::{debug, warn};

use crate::db::learning::{SharedLearningStore, ToolLogTerminal};
use crate::tutor::context::StudentContext;
use crate::tutor::tools::ToolOutcome;

/// Audit trail writer. Failures are reported through `warn!` and never returned.
#[derive(Debug, Clone)]
pub struct ExecutionLogger {
    store: SharedLearningStore,
}

impl ExecutionLogger {
    pub fn new(store: SharedLearningStore) -> Self {
        Self { store }
    }

    pub async fn log_start(
        &self,
        ctx: &StudentContext,
        tool_name: &str,
        input: &Value,
    ) -> Option<String> {
        let conversation_id = ctx.conversation_id.clone();
        let student_id = ctx.student_id.clone();
        let tool = tool_name.to_string();
        let input = input.clone();
        match self
            .store
            .run_blocking(move |store| {
                store.insert_pending_tool_log(
                    conversation_id.as_deref(),
                    student_id.as_str(),
                    tool.as_str(),
                    &input,
                )
            })
            .await
        {
            Ok(log_id) => {
                debug!(log_id = %log_id, tool = tool_name, "tool execution logged as pending");
                Some(log_id)
            }
            Err(error) => {
                warn!(
                    student_id = %ctx.student_id,
                    tool = tool_name,
                    %error,
                    "failed to write pending tool log"
                );
                None
            }
        }
    }

    pub async fn log_complete(&self, log_id: &str, outcome: &ToolOutcome) {
        let terminal = match outcome {
            ToolOutcome::Success(data) => ToolLogTerminal::Success {
                output: data.clone(),
            },
            ToolOutcome::Failure { error } => ToolLogTerminal::Failed {
                error: error.clone(),
            },
        };
        let id = log_id.to_string();
        match self
            .store
            .run_blocking(move |store| store.complete_tool_log(id.as_str(), terminal))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(log_id, "tool log was not pending; completion ignored"),
            Err(error) => warn!(log_id, %error, "failed to complete tool log"),
        }
    }

    pub async fn log_rate_limited(
        &self,
        ctx: &StudentContext,
        tool_name: &str,
        input: &Value,
        reason: &str,
    ) {
        let conversation_id = ctx.conversation_id.clone();
        let student_id = ctx.student_id.clone();
        let tool = tool_name.to_string();
        let input = input.clone();
        let reason_owned = reason.to_string();
        if let Err(error) = self
            .store
            .run_blocking(move |store| {
                store.insert_rate_limited_tool_log(
                    conversation_id.as_deref(),
                    student_id.as_str(),
                    tool.as_str(),
                    &input,
                    reason_owned.as_str(),
                )
            })
            .await
        {
            warn!(
                student_id = %ctx.student_id,
                tool = tool_name,
                %error,
                "failed to write rate-limited tool log"
            );
        }
    }
}
