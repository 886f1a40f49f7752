use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{
    new_id, normalize_optional_text, normalize_required_text, now_iso, LearningRepoError,
    LearningStore,
};

const MAX_SEARCH_TERMS: usize = 6;

#[derive(Debug, Clone, Serialize)]
pub struct SubjectRecord {
    pub id: String,
    pub slug: String,
    pub name_en: String,
    pub name_ar: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonRecord {
    pub id: String,
    pub subject_id: String,
    pub subject_name_en: String,
    pub subject_name_ar: String,
    pub title_en: String,
    pub title_ar: String,
    pub description_en: String,
    pub description_ar: String,
    pub grade_level: Option<i64>,
    pub sort_order: i64,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LessonContentSource {
    pub lesson: LessonRecord,
    pub blocks: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct LessonSearchHit {
    pub lesson: LessonRecord,
    pub matched_terms: usize,
}

#[derive(Debug, Clone)]
pub struct LessonEmbeddingRow {
    pub lesson_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertSubjectInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub name_ar: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertLessonInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub title_en: String,
    #[serde(default)]
    pub title_ar: String,
    #[serde(default)]
    pub description_en: Option<String>,
    #[serde(default)]
    pub description_ar: Option<String>,
    #[serde(default)]
    pub grade_level: Option<i64>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlockInput {
    #[serde(default)]
    pub lesson_id: String,
    #[serde(default)]
    pub body_en: String,
    #[serde(default)]
    pub body_ar: String,
}

impl LearningStore {
    pub fn upsert_subject(
        &self,
        input: UpsertSubjectInput,
    ) -> Result<SubjectRecord, LearningRepoError> {
        let slug = normalize_required_text(input.slug.as_str(), "slug")?.to_lowercase();
        let name_en = input.name_en.trim().to_string();
        let name_ar = input.name_ar.trim().to_string();
        if name_en.is_empty() && name_ar.is_empty() {
            return Err(LearningRepoError::Validation(String::from(
                "Subject needs a name in at least one language",
            )));
        }
        let id = normalize_optional_text(input.id.as_deref()).unwrap_or_else(new_id);

        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO subjects (id, slug, name_en, name_ar, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                  slug = excluded.slug,
                  name_en = excluded.name_en,
                  name_ar = excluded.name_ar
            ",
                params![id, slug, name_en, name_ar, now_iso()],
            )?;
            fetch_subject(conn, id.as_str())?.ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn list_subjects(&self) -> Result<Vec<SubjectRecord>, LearningRepoError> {
        self.with_connection(list_subjects_on)
    }

    pub fn upsert_lesson(
        &self,
        input: UpsertLessonInput,
    ) -> Result<LessonRecord, LearningRepoError> {
        let subject_id = normalize_required_text(input.subject_id.as_str(), "subject_id")?;
        if input.title_en.trim().is_empty() && input.title_ar.trim().is_empty() {
            return Err(LearningRepoError::Validation(String::from(
                "Lesson needs a title in at least one language",
            )));
        }
        let id = normalize_optional_text(input.id.as_deref()).unwrap_or_else(new_id);

        self.with_connection(|conn| {
            if fetch_subject(conn, subject_id.as_str())?.is_none() {
                return Err(LearningRepoError::Validation(format!(
                    "Unknown subject '{subject_id}'"
                )));
            }
            conn.execute(
                "
                INSERT INTO lessons
                  (id, subject_id, title_en, title_ar, description_en, description_ar,
                   grade_level, sort_order, duration_minutes, is_published, created_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)
                ON CONFLICT(id) DO UPDATE SET
                  subject_id = excluded.subject_id,
                  title_en = excluded.title_en,
                  title_ar = excluded.title_ar,
                  description_en = excluded.description_en,
                  description_ar = excluded.description_ar,
                  grade_level = excluded.grade_level,
                  sort_order = excluded.sort_order,
                  duration_minutes = excluded.duration_minutes
            ",
                params![
                    id,
                    subject_id,
                    input.title_en.trim(),
                    input.title_ar.trim(),
                    input.description_en.as_deref().map(str::trim).unwrap_or(""),
                    input.description_ar.as_deref().map(str::trim).unwrap_or(""),
                    input.grade_level,
                    input.sort_order.unwrap_or(0),
                    input.duration_minutes,
                    now_iso()
                ],
            )?;
            fetch_lesson(conn, id.as_str())?.ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn append_content_block(&self, input: ContentBlockInput) -> Result<i64, LearningRepoError> {
        let lesson_id = normalize_required_text(input.lesson_id.as_str(), "lesson_id")?;
        self.with_connection(|conn| {
            if fetch_lesson(conn, lesson_id.as_str())?.is_none() {
                return Err(LearningRepoError::NotFound);
            }
            let position = conn.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM lesson_content_blocks WHERE lesson_id = ?1",
                [lesson_id.as_str()],
                |row| row.get::<_, i64>(0),
            )?;
            conn.execute(
                "
                INSERT INTO lesson_content_blocks (id, lesson_id, position, body_en, body_ar)
                VALUES (?1, ?2, ?3, ?4, ?5)
            ",
                params![new_id(), lesson_id, position, input.body_en, input.body_ar],
            )?;
            Ok(position)
        })
    }

    pub fn list_lessons(
        &self,
        subject_id: Option<&str>,
        grade_level: Option<i64>,
        limit: usize,
    ) -> Result<Vec<LessonRecord>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut sql = format!("{LESSON_SELECT} WHERE l.is_published = 1");
            let mut values = Vec::<SqlValue>::new();
            if let Some(subject_id) = subject_id {
                values.push(SqlValue::Text(subject_id.to_string()));
                sql.push_str(format!(" AND l.subject_id = ?{}", values.len()).as_str());
            }
            if let Some(grade) = grade_level {
                values.push(SqlValue::Integer(grade));
                sql.push_str(
                    format!(
                        " AND (l.grade_level IS NULL OR l.grade_level = ?{})",
                        values.len()
                    )
                    .as_str(),
                );
            }
            values.push(SqlValue::Integer(limit as i64));
            sql.push_str(
                format!(
                    " ORDER BY s.slug ASC, l.sort_order ASC, l.created_at ASC LIMIT ?{}",
                    values.len()
                )
                .as_str(),
            );

            let mut stmt = conn.prepare(sql.as_str())?;
            let rows = stmt.query_map(params_from_iter(values), row_to_lesson)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn get_lesson(&self, lesson_id: &str) -> Result<LessonRecord, LearningRepoError> {
        self.with_connection(|conn| {
            fetch_lesson(conn, lesson_id)?.ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn lesson_content_source(
        &self,
        lesson_id: &str,
    ) -> Result<LessonContentSource, LearningRepoError> {
        self.with_connection(|conn| {
            let lesson = fetch_lesson(conn, lesson_id)?.ok_or(LearningRepoError::NotFound)?;
            let mut stmt = conn.prepare(
                "
                SELECT body_en, body_ar
                FROM lesson_content_blocks
                WHERE lesson_id = ?1
                ORDER BY position ASC
            ",
            )?;
            let rows = stmt.query_map([lesson_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })?;
            let mut blocks = Vec::new();
            for row in rows {
                blocks.push(row?);
            }
            Ok(LessonContentSource { lesson, blocks })
        })
    }

    /// Substring match of each query term across bilingual titles, descriptions and content.
    pub fn keyword_search_lessons(
        &self,
        query: &str,
        grade_level: Option<i64>,
        limit: usize,
    ) -> Result<Vec<LessonSearchHit>, LearningRepoError> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        self.with_connection(|conn| {
            let mut clauses = Vec::new();
            let mut values = Vec::<SqlValue>::new();
            for term in &terms {
                values.push(SqlValue::Text(format!("%{term}%")));
                let n = values.len();
                clauses.push(format!(
                    "(l.title_en LIKE ?{n} OR l.title_ar LIKE ?{n} OR l.description_en LIKE ?{n} \
                     OR l.description_ar LIKE ?{n} OR EXISTS (SELECT 1 FROM lesson_content_blocks b \
                     WHERE b.lesson_id = l.id AND (b.body_en LIKE ?{n} OR b.body_ar LIKE ?{n})))"
                ));
            }
            let mut sql = format!(
                "{LESSON_SELECT} WHERE l.is_published = 1 AND ({})",
                clauses.join(" OR ")
            );
            if let Some(grade) = grade_level {
                values.push(SqlValue::Integer(grade));
                sql.push_str(
                    format!(
                        " AND (l.grade_level IS NULL OR l.grade_level = ?{})",
                        values.len()
                    )
                    .as_str(),
                );
            }
            sql.push_str(" ORDER BY l.sort_order ASC, l.created_at ASC");

            let mut stmt = conn.prepare(sql.as_str())?;
            let rows = stmt.query_map(params_from_iter(values), row_to_lesson)?;
            let mut hits = Vec::new();
            for row in rows {
                let lesson = row?;
                let haystack = format!(
                    "{} {} {} {}",
                    lesson.title_en, lesson.title_ar, lesson.description_en, lesson.description_ar
                )
                .to_lowercase();
                let matched_terms = terms
                    .iter()
                    .filter(|term| haystack.contains(term.as_str()))
                    .count()
                    .max(1);
                hits.push(LessonSearchHit {
                    lesson,
                    matched_terms,
                });
            }
            hits.sort_by(|a, b| b.matched_terms.cmp(&a.matched_terms));
            hits.truncate(limit);
            Ok(hits)
        })
    }

    pub fn store_lesson_embedding(
        &self,
        lesson_id: &str,
        chunk_index: i64,
        content: &str,
        embedding: &[f32],
    ) -> Result<(), LearningRepoError> {
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|e| LearningRepoError::Internal(format!("embedding encode failed: {e}")))?;
        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO lesson_embeddings (lesson_id, chunk_index, content, embedding_json)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(lesson_id, chunk_index) DO UPDATE SET
                  content = excluded.content,
                  embedding_json = excluded.embedding_json
            ",
                params![lesson_id, chunk_index, content, embedding_json],
            )?;
            Ok(())
        })
    }

    /// Drops chunks past `keep_chunks`, left over from a longer earlier version.
    pub fn prune_lesson_embeddings(
        &self,
        lesson_id: &str,
        keep_chunks: i64,
    ) -> Result<usize, LearningRepoError> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM lesson_embeddings WHERE lesson_id = ?1 AND chunk_index >= ?2",
                params![lesson_id, keep_chunks],
            )
            .map_err(LearningRepoError::from)
        })
    }

    pub fn list_lesson_embeddings(
        &self,
        lesson_id: Option<&str>,
    ) -> Result<Vec<LessonEmbeddingRow>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT e.lesson_id, e.chunk_index, e.content, e.embedding_json
                FROM lesson_embeddings e
                JOIN lessons l ON l.id = e.lesson_id
                WHERE l.is_published = 1 AND (?1 IS NULL OR e.lesson_id = ?1)
                ORDER BY e.lesson_id ASC, e.chunk_index ASC
            ",
            )?;
            let rows = stmt.query_map([lesson_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (lesson_id, chunk_index, content, raw) = row?;
                let embedding = serde_json::from_str::<Vec<f32>>(raw.as_str()).map_err(|e| {
                    LearningRepoError::Internal(format!("embedding decode failed: {e}"))
                })?;
                out.push(LessonEmbeddingRow {
                    lesson_id,
                    chunk_index,
                    content,
                    embedding,
                });
            }
            Ok(out)
        })
    }
}

pub(super) fn ensure_catalog_tables(conn: &Connection) -> Result<(), LearningRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subjects (
          id TEXT PRIMARY KEY,
          slug TEXT NOT NULL,
          name_en TEXT NOT NULL DEFAULT '',
          name_ar TEXT NOT NULL DEFAULT '',
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lessons (
          id TEXT PRIMARY KEY,
          subject_id TEXT NOT NULL,
          title_en TEXT NOT NULL DEFAULT '',
          title_ar TEXT NOT NULL DEFAULT '',
          description_en TEXT NOT NULL DEFAULT '',
          description_ar TEXT NOT NULL DEFAULT '',
          grade_level INTEGER,
          sort_order INTEGER NOT NULL DEFAULT 0,
          duration_minutes INTEGER,
          is_published INTEGER NOT NULL DEFAULT 1,
          created_at TEXT NOT NULL,
          FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS lesson_content_blocks (
          id TEXT PRIMARY KEY,
          lesson_id TEXT NOT NULL,
          position INTEGER NOT NULL,
          body_en TEXT,
          body_ar TEXT,
          FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS lesson_embeddings (
          lesson_id TEXT NOT NULL,
          chunk_index INTEGER NOT NULL,
          content TEXT NOT NULL,
          embedding_json TEXT NOT NULL,
          PRIMARY KEY(lesson_id, chunk_index),
          FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    )?;
    Ok(())
}

const LESSON_SELECT: &str = "
    SELECT
      l.id, l.subject_id, l.title_en, l.title_ar, l.description_en, l.description_ar,
      l.grade_level, l.sort_order, l.duration_minutes,
      s.name_en AS subject_name_en, s.name_ar AS subject_name_ar
    FROM lessons l
    JOIN subjects s ON s.id = l.subject_id
";

pub(super) fn fetch_lesson(
    conn: &Connection,
    lesson_id: &str,
) -> Result<Option<LessonRecord>, LearningRepoError> {
    conn.query_row(
        format!("{LESSON_SELECT} WHERE l.id = ?1 LIMIT 1").as_str(),
        [lesson_id],
        row_to_lesson,
    )
    .optional()
    .map_err(LearningRepoError::from)
}

pub(super) fn fetch_subject(
    conn: &Connection,
    subject_id: &str,
) -> Result<Option<SubjectRecord>, LearningRepoError> {
    conn.query_row(
        "SELECT id, slug, name_en, name_ar FROM subjects WHERE id = ?1 LIMIT 1",
        [subject_id],
        row_to_subject,
    )
    .optional()
    .map_err(LearningRepoError::from)
}

pub(super) fn list_subjects_on(conn: &Connection) -> Result<Vec<SubjectRecord>, LearningRepoError> {
    let mut stmt =
        conn.prepare("SELECT id, slug, name_en, name_ar FROM subjects ORDER BY slug ASC, id ASC")?;
    let rows = stmt.query_map([], row_to_subject)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn row_to_subject(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubjectRecord> {
    Ok(SubjectRecord {
        id: row.get("id")?,
        slug: row.get("slug")?,
        name_en: row.get("name_en")?,
        name_ar: row.get("name_ar")?,
    })
}

fn row_to_lesson(row: &rusqlite::Row<'_>) -> rusqlite::Result<LessonRecord> {
    Ok(LessonRecord {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        subject_name_en: row.get("subject_name_en")?,
        subject_name_ar: row.get("subject_name_ar")?,
        title_en: row.get("title_en")?,
        title_ar: row.get("title_ar")?,
        description_en: row.get("description_en")?,
        description_ar: row.get("description_ar")?,
        grade_level: row.get("grade_level")?,
        sort_order: row.get("sort_order")?,
        duration_minutes: row.get("duration_minutes")?,
    })
}

fn search_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in query.split_whitespace() {
        let term = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if term.chars().count() < 2 || terms.contains(&term) {
            continue;
        }
        terms.push(term);
        if terms.len() == MAX_SEARCH_TERMS {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use crate::db::learning::test_support::temp_store;

    use super::*;

    #[test]
    fn search_terms_skip_short_and_duplicate_tokens() {
        assert_eq!(
            search_terms("Add a fraction, add!! الجمع"),
            vec![
                String::from("add"),
                String::from("fraction"),
                String::from("الجمع")
            ]
        );
    }

    #[test]
    fn keyword_search_matches_content_blocks_and_ranks_by_terms() {
        let store = temp_store();
        let subject = store
            .upsert_subject(UpsertSubjectInput {
                slug: String::from("math"),
                name_en: String::from("Mathematics"),
                name_ar: String::from("الرياضيات"),
                ..UpsertSubjectInput::default()
            })
            .expect("subject should save");
        let fractions = store
            .upsert_lesson(UpsertLessonInput {
                subject_id: subject.id.clone(),
                title_en: String::from("Fractions"),
                title_ar: String::from("الكسور"),
                description_en: Some(String::from("Adding fractions with like denominators")),
                ..UpsertLessonInput::default()
            })
            .expect("lesson should save");
        let shapes = store
            .upsert_lesson(UpsertLessonInput {
                subject_id: subject.id,
                title_en: String::from("Shapes"),
                title_ar: String::from("الأشكال"),
                ..UpsertLessonInput::default()
            })
            .expect("lesson should save");
        store
            .append_content_block(ContentBlockInput {
                lesson_id: shapes.id.clone(),
                body_en: String::from("A triangle has three sides."),
                body_ar: String::new(),
            })
            .expect("block should save");

        let hits = store
            .keyword_search_lessons("triangle", None, 5)
            .expect("search should work");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lesson.id, shapes.id);

        let hits = store
            .keyword_search_lessons("adding fractions", None, 5)
            .expect("search should work");
        assert_eq!(hits[0].lesson.id, fractions.id);
        assert_eq!(hits[0].matched_terms, 2);
    }
}
