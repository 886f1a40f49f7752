use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::{
    new_id, normalize_optional_text, normalize_required_text, now_iso, LearningRepoError,
    LearningStore,
};

#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub id: String,
    pub student_id: String,
    pub lesson_id: Option<String>,
    pub homework_id: Option<String>,
    pub subject_id: Option<String>,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateConversationInput {
    pub student_id: String,
    pub lesson_id: Option<String>,
    pub homework_id: Option<String>,
    pub subject_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub tool_parts: Vec<Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewMessageInput {
    pub id: Option<String>,
    pub content: String,
    pub tool_parts: Vec<Value>,
}

/// One completed request/response pair.
#[derive(Debug, Clone, Default)]
pub struct PersistTurnInput {
    pub conversation_id: String,
    pub user: NewMessageInput,
    pub assistant: NewMessageInput,
}

impl LearningStore {
    pub fn create_conversation(
        &self,
        input: CreateConversationInput,
    ) -> Result<ConversationRecord, LearningRepoError> {
        let student_id = normalize_required_text(input.student_id.as_str(), "student_id")?;
        let title = normalize_optional_text(Some(input.title.as_str()))
            .unwrap_or_else(|| String::from("New conversation"));
        let id = new_id();
        let now = now_iso();

        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO conversations
                  (id, student_id, lesson_id, homework_id, subject_id, title, created_at, updated_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ",
                params![
                    id,
                    student_id,
                    normalize_optional_text(input.lesson_id.as_deref()),
                    normalize_optional_text(input.homework_id.as_deref()),
                    normalize_optional_text(input.subject_id.as_deref()),
                    title,
                    now
                ],
            )?;
            fetch_conversation(conn, id.as_str())?.ok_or(LearningRepoError::NotFound)
        })
    }

    /// Conversations owned by someone else resolve as not found.
    pub fn get_student_conversation(
        &self,
        student_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationRecord, LearningRepoError> {
        self.with_connection(|conn| {
            fetch_conversation(conn, conversation_id)?
                .filter(|record| record.student_id == student_id)
                .ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn list_conversations(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                format!(
                    "{CONVERSATION_SELECT}
                     WHERE student_id = ?1
                     ORDER BY updated_at DESC, rowid DESC
                     LIMIT ?2"
                )
                .as_str(),
            )?;
            let rows = stmt.query_map(params![student_id, limit as i64], row_to_conversation)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessageRecord>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT id, conversation_id, role, content, tool_parts_json, created_at
                FROM messages
                WHERE conversation_id = ?1
                ORDER BY created_at ASC, rowid ASC
            ",
            )?;
            let rows = stmt.query_map([conversation_id], |row| {
                Ok((
                    MessageRecord {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        tool_parts: Vec::new(),
                        created_at: row.get(5)?,
                    },
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (mut record, raw_parts) = row?;
                if let Some(raw) = raw_parts {
                    record.tool_parts = serde_json::from_str(raw.as_str()).map_err(|e| {
                        LearningRepoError::Internal(format!("tool parts decode failed: {e}"))
                    })?;
                }
                out.push(record);
            }
            Ok(out)
        })
    }

    /// Appends the user message, then the assistant message, and bumps `updated_at`.
    pub fn persist_turn(
        &self,
        input: PersistTurnInput,
    ) -> Result<(MessageRecord, MessageRecord), LearningRepoError> {
        let conversation_id =
            normalize_required_text(input.conversation_id.as_str(), "conversation_id")?;

        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            if fetch_conversation(&tx, conversation_id.as_str())?.is_none() {
                return Err(LearningRepoError::NotFound);
            }
            let now = now_iso();
            let user = insert_message(&tx, conversation_id.as_str(), "user", input.user, &now)?;
            let assistant = insert_message(
                &tx,
                conversation_id.as_str(),
                "assistant",
                input.assistant,
                &now,
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id, now],
            )?;
            tx.commit()?;
            Ok((user, assistant))
        })
    }
}

pub(super) fn ensure_conversation_tables(conn: &Connection) -> Result<(), LearningRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
          id TEXT PRIMARY KEY,
          student_id TEXT NOT NULL,
          lesson_id TEXT,
          homework_id TEXT,
          subject_id TEXT,
          title TEXT NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          FOREIGN KEY(student_id) REFERENCES profiles(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS messages (
          id TEXT PRIMARY KEY,
          conversation_id TEXT NOT NULL,
          role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
          content TEXT NOT NULL DEFAULT '',
          tool_parts_json TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_student_updated
          ON conversations(student_id, updated_at);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
          ON messages(conversation_id, created_at);
    ",
    )?;
    Ok(())
}

const CONVERSATION_SELECT: &str = "
    SELECT id, student_id, lesson_id, homework_id, subject_id, title, created_at, updated_at
    FROM conversations
";

fn fetch_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<ConversationRecord>, LearningRepoError> {
    conn.query_row(
        format!("{CONVERSATION_SELECT} WHERE id = ?1 LIMIT 1").as_str(),
        [conversation_id],
        row_to_conversation,
    )
    .optional()
    .map_err(LearningRepoError::from)
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.get("id")?,
        student_id: row.get("student_id")?,
        lesson_id: row.get("lesson_id")?,
        homework_id: row.get("homework_id")?,
        subject_id: row.get("subject_id")?,
        title: row.get("title")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    role: &str,
    input: NewMessageInput,
    created_at: &str,
) -> Result<MessageRecord, LearningRepoError> {
    let id = normalize_optional_text(input.id.as_deref()).unwrap_or_else(new_id);
    let tool_parts_json = if input.tool_parts.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&input.tool_parts).map_err(|e| {
            LearningRepoError::Internal(format!("tool parts encode failed: {e}"))
        })?)
    };
    conn.execute(
        "
        INSERT INTO messages (id, conversation_id, role, content, tool_parts_json, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ",
        params![
            id,
            conversation_id,
            role,
            input.content,
            tool_parts_json,
            created_at
        ],
    )?;
    Ok(MessageRecord {
        id,
        conversation_id: conversation_id.to_string(),
        role: role.to_string(),
        content: input.content,
        tool_parts: input.tool_parts,
        created_at: created_at.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::db::learning::test_support::temp_store;
    use crate::db::learning::UpsertProfileInput;

    use super::*;

    #[test]
    fn turns_persist_as_alternating_pairs() {
        let store = temp_store();
        let student = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("Huda"),
                ..UpsertProfileInput::default()
            })
            .expect("profile");
        let conversation = store
            .create_conversation(CreateConversationInput {
                student_id: student.id.clone(),
                title: String::from("Fractions help"),
                ..CreateConversationInput::default()
            })
            .expect("conversation");

        for turn in 0..3 {
            store
                .persist_turn(PersistTurnInput {
                    conversation_id: conversation.id.clone(),
                    user: NewMessageInput {
                        content: format!("question {turn}"),
                        ..NewMessageInput::default()
                    },
                    assistant: NewMessageInput {
                        content: format!("answer {turn}"),
                        tool_parts: vec![json!({"type": "tool-get_student_profile", "state": "output-available"})],
                        ..NewMessageInput::default()
                    },
                })
                .expect("persist");
        }

        let messages = store
            .list_messages(conversation.id.as_str())
            .expect("messages");
        let roles = messages.iter().map(|m| m.role.as_str()).collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec!["user", "assistant", "user", "assistant", "user", "assistant"]
        );
        assert_eq!(messages[1].tool_parts.len(), 1);
        assert!(messages[0].tool_parts.is_empty());
    }

    #[test]
    fn foreign_conversation_is_not_found() {
        let store = temp_store();
        let owner = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("Owner"),
                ..UpsertProfileInput::default()
            })
            .expect("profile");
        let conversation = store
            .create_conversation(CreateConversationInput {
                student_id: owner.id.clone(),
                title: String::new(),
                ..CreateConversationInput::default()
            })
            .expect("conversation");
        assert_eq!(conversation.title, "New conversation");

        let err = store
            .get_student_conversation("someone-else", conversation.id.as_str())
            .expect_err("must be hidden");
        assert!(matches!(err, LearningRepoError::NotFound));
    }
}
