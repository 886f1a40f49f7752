use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::{new_id, now_iso, LearningRepoError, LearningStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolLogStatus {
    Pending,
    Success,
    Failed,
    RateLimited,
}

impl ToolLogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RateLimited => "rate_limited",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "rate_limited" => Some(Self::RateLimited),
            _ => None,
        }
    }
}

/// Final state written onto a pending row.
#[derive(Debug, Clone)]
pub enum ToolLogTerminal {
    Success { output: Value },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolLogRecord {
    pub id: String,
    pub conversation_id: Option<String>,
    pub student_id: String,
    pub tool_name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub status: ToolLogStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub executed_at: Option<String>,
}

impl LearningStore {
    pub fn insert_pending_tool_log(
        &self,
        conversation_id: Option<&str>,
        student_id: &str,
        tool_name: &str,
        input: &Value,
    ) -> Result<String, LearningRepoError> {
        let id = new_id();
        let now = now_iso();
        self.with_connection(|conn| {
            insert_row(
                conn,
                RowValues {
                    id: id.as_str(),
                    conversation_id,
                    student_id,
                    tool_name,
                    input,
                    status: ToolLogStatus::Pending,
                    error_message: None,
                    created_at: now.as_str(),
                    executed_at: None,
                },
            )
        })?;
        Ok(id)
    }

    /// Moves a pending row to its terminal status. Returns false when the row was not pending.
    pub fn complete_tool_log(
        &self,
        log_id: &str,
        terminal: ToolLogTerminal,
    ) -> Result<bool, LearningRepoError> {
        let (status, output_json, error_message) = match terminal {
            ToolLogTerminal::Success { output } => (
                ToolLogStatus::Success,
                Some(encode_json(&output)?),
                None::<String>,
            ),
            ToolLogTerminal::Failed { error } => (ToolLogStatus::Failed, None, Some(error)),
        };
        self.with_connection(|conn| {
            let affected = conn.execute(
                "
                UPDATE tool_execution_logs
                SET status = ?2, output_json = ?3, error_message = ?4, executed_at = ?5
                WHERE id = ?1 AND status = 'pending'
            ",
                params![log_id, status.as_str(), output_json, error_message, now_iso()],
            )?;
            Ok(affected == 1)
        })
    }

    pub fn insert_rate_limited_tool_log(
        &self,
        conversation_id: Option<&str>,
        student_id: &str,
        tool_name: &str,
        input: &Value,
        reason: &str,
    ) -> Result<String, LearningRepoError> {
        let id = new_id();
        let now = now_iso();
        self.with_connection(|conn| {
            insert_row(
                conn,
                RowValues {
                    id: id.as_str(),
                    conversation_id,
                    student_id,
                    tool_name,
                    input,
                    status: ToolLogStatus::RateLimited,
                    error_message: Some(reason),
                    created_at: now.as_str(),
                    executed_at: Some(now.as_str()),
                },
            )
        })?;
        Ok(id)
    }

    pub fn count_successful_tool_calls_since(
        &self,
        student_id: &str,
        tool_name: &str,
        since_iso: &str,
    ) -> Result<i64, LearningRepoError> {
        self.with_connection(|conn| {
            conn.query_row(
                "
                SELECT COUNT(*)
                FROM tool_execution_logs
                WHERE student_id = ?1 AND tool_name = ?2 AND status = 'success' AND created_at >= ?3
            ",
                params![student_id, tool_name, since_iso],
                |row| row.get::<_, i64>(0),
            )
            .map_err(LearningRepoError::from)
        })
    }

    /// Timestamp of the newest row for the pair, whatever its status.
    pub fn latest_tool_call_at(
        &self,
        student_id: &str,
        tool_name: &str,
    ) -> Result<Option<String>, LearningRepoError> {
        self.with_connection(|conn| {
            conn.query_row(
                "
                SELECT created_at
                FROM tool_execution_logs
                WHERE student_id = ?1 AND tool_name = ?2
                ORDER BY created_at DESC, rowid DESC
                LIMIT 1
            ",
                params![student_id, tool_name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(LearningRepoError::from)
        })
    }

    pub fn list_tool_logs(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<ToolLogRecord>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT
                  id, conversation_id, student_id, tool_name, input_json, output_json,
                  status, error_message, created_at, executed_at
                FROM tool_execution_logs
                WHERE student_id = ?1
                ORDER BY created_at ASC, rowid ASC
                LIMIT ?2
            ",
            )?;
            let rows = stmt.query_map(params![student_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (
                    id,
                    conversation_id,
                    student_id,
                    tool_name,
                    input_json,
                    output_json,
                    status,
                    error_message,
                    created_at,
                    executed_at,
                ) = row?;
                let status = ToolLogStatus::parse(status.as_str()).ok_or_else(|| {
                    LearningRepoError::Internal(format!("unknown tool log status '{status}'"))
                })?;
                out.push(ToolLogRecord {
                    id,
                    conversation_id,
                    student_id,
                    tool_name,
                    input: decode_json(input_json.as_str())?,
                    output: output_json.as_deref().map(decode_json).transpose()?,
                    status,
                    error_message,
                    created_at,
                    executed_at,
                });
            }
            Ok(out)
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_tool_log_at(
        &self,
        student_id: &str,
        tool_name: &str,
        status: ToolLogStatus,
        created_at: &str,
    ) -> Result<String, LearningRepoError> {
        let id = new_id();
        self.with_connection(|conn| {
            insert_row(
                conn,
                RowValues {
                    id: id.as_str(),
                    conversation_id: None,
                    student_id,
                    tool_name,
                    input: &Value::Null,
                    status,
                    error_message: None,
                    created_at,
                    executed_at: (status != ToolLogStatus::Pending).then_some(created_at),
                },
            )
        })?;
        Ok(id)
    }
}

pub(super) fn ensure_tool_log_tables(conn: &Connection) -> Result<(), LearningRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tool_execution_logs (
          id TEXT PRIMARY KEY,
          conversation_id TEXT,
          student_id TEXT NOT NULL,
          tool_name TEXT NOT NULL,
          input_json TEXT NOT NULL,
          output_json TEXT,
          status TEXT NOT NULL CHECK (status IN ('pending', 'success', 'failed', 'rate_limited')),
          error_message TEXT,
          created_at TEXT NOT NULL,
          executed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tool_logs_student_tool_created
          ON tool_execution_logs(student_id, tool_name, created_at);
    ",
    )?;
    Ok(())
}

struct RowValues<'a> {
    id: &'a str,
    conversation_id: Option<&'a str>,
    student_id: &'a str,
    tool_name: &'a str,
    input: &'a Value,
    status: ToolLogStatus,
    error_message: Option<&'a str>,
    created_at: &'a str,
    executed_at: Option<&'a str>,
}

fn insert_row(conn: &Connection, row: RowValues<'_>) -> Result<(), LearningRepoError> {
    conn.execute(
        "
        INSERT INTO tool_execution_logs
          (id, conversation_id, student_id, tool_name, input_json, output_json,
           status, error_message, created_at, executed_at)
        VALUES
          (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8, ?9)
    ",
        params![
            row.id,
            row.conversation_id,
            row.student_id,
            row.tool_name,
            encode_json(row.input)?,
            row.status.as_str(),
            row.error_message,
            row.created_at,
            row.executed_at
        ],
    )?;
    Ok(())
}

fn encode_json(value: &Value) -> Result<String, LearningRepoError> {
    serde_json::to_string(value)
        .map_err(|e| LearningRepoError::Internal(format!("tool log encode failed: {e}")))
}

fn decode_json(raw: &str) -> Result<Value, LearningRepoError> {
    serde_json::from_str(raw)
        .map_err(|e| LearningRepoError::Internal(format!("tool log decode failed: {e}")))
}
