mod catalog;
mod conversations;
mod demo;
mod homework;
mod profiles;
mod progress;
mod tool_log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

pub use catalog::{
    ContentBlockInput, LessonContentSource, LessonEmbeddingRow, LessonRecord, LessonSearchHit,
    SubjectRecord, UpsertLessonInput, UpsertSubjectInput,
};
pub use conversations::{
    ConversationRecord, CreateConversationInput, MessageRecord, NewMessageInput, PersistTurnInput,
};
pub use demo::{DemoSeed, DEMO_STUDENT_ID};
pub use homework::{
    AssignmentBundleInput, AssignmentDetailRecord, AssignmentQuestionRecord,
    CommittedAssignment, HomeworkListEntry, NewQuestionRow, MAX_ASSIGNMENT_QUESTIONS,
};
#[cfg(test)]
pub use homework::test_support::SubmissionAnswerInput;
pub use profiles::{IssuedAccessToken, ProfileRecord, UpsertProfileInput};
pub use progress::{
    LessonProgressInput, LessonProgressRecord, MistakeRecord, ProgressSummary, SubjectScore,
};
pub use tool_log::{ToolLogRecord, ToolLogStatus, ToolLogTerminal};

#[derive(Debug, Error)]
pub enum LearningRepoError {
    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type SharedLearningStore = Arc<LearningStore>;

#[derive(Debug, Clone)]
pub struct LearningStore {
    db_path: PathBuf,
}

impl LearningStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn initialize(&self) -> Result<(), LearningRepoError> {
        self.with_connection(|_| Ok(()))
    }

    /// Runs a blocking store operation on the blocking pool.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, func: F) -> Result<T, LearningRepoError>
    where
        T: Send + 'static,
        F: FnOnce(&LearningStore) -> Result<T, LearningRepoError> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || func(store.as_ref()))
            .await
            .map_err(|e| LearningRepoError::Internal(format!("store task failed: {e}")))?
    }

    fn open(&self) -> Result<Connection, LearningRepoError> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(self.db_path.as_path())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        ensure_schema(&conn)?;
        Ok(conn)
    }

    fn with_connection<T, F>(&self, func: F) -> Result<T, LearningRepoError>
    where
        F: FnOnce(&Connection) -> Result<T, LearningRepoError>,
    {
        let conn = self.open()?;
        func(&conn)
    }

    fn with_connection_mut<T, F>(&self, func: F) -> Result<T, LearningRepoError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LearningRepoError>,
    {
        let mut conn = self.open()?;
        func(&mut conn)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), LearningRepoError> {
    profiles::ensure_profile_tables(conn)?;
    catalog::ensure_catalog_tables(conn)?;
    progress::ensure_progress_tables(conn)?;
    homework::ensure_homework_tables(conn)?;
    conversations::ensure_conversation_tables(conn)?;
    tool_log::ensure_tool_log_tables(conn)?;
    Ok(())
}

pub(crate) fn now_iso() -> String {
    to_iso(Utc::now())
}

pub(crate) fn to_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

pub(crate) fn normalize_required_text(
    value: &str,
    field: &str,
) -> Result<String, LearningRepoError> {
    normalize_optional_text(Some(value))
        .ok_or_else(|| LearningRepoError::Validation(format!("Field '{field}' is required")))
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_timestamps_sort_lexicographically() {
        let earlier = to_iso(DateTime::parse_from_rfc3339("2026-03-01T09:05:00Z").unwrap().into());
        let later = to_iso(DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap().into());
        assert_eq!(earlier, "2026-03-01T09:05:00Z");
        assert!(earlier < later);
    }

    #[test]
    fn required_text_rejects_blank_values() {
        let err = normalize_required_text("   ", "title").expect_err("blank must fail");
        assert_eq!(err.to_string(), "Field 'title' is required");
    }

    #[test]
    fn unopenable_database_surfaces_sqlite_error() {
        let dir = std::env::temp_dir().join(format!("tutor_dir_{}", new_id()));
        std::fs::create_dir_all(dir.as_path()).expect("dir should be creatable");
        let store = LearningStore::new(dir);
        assert!(store.initialize().is_err());
    }
}
