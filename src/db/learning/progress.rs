use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{normalize_required_text, now_iso, LearningRepoError, LearningStore};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LessonProgressInput {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub lesson_id: String,
    #[serde(default)]
    pub progress_percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonProgressRecord {
    pub lesson_id: String,
    pub lesson_title_en: String,
    pub lesson_title_ar: String,
    pub subject_id: String,
    pub status: String,
    pub progress_percent: i64,
    pub last_accessed_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectScore {
    pub subject_id: String,
    pub name_en: String,
    pub name_ar: String,
    pub lessons_total: i64,
    pub lessons_completed: i64,
    pub average_progress: f64,
    pub homework_average: Option<f64>,
    pub graded_count: i64,
}

impl SubjectScore {
    /// Blend of lesson progress and graded homework, 0..=100.
    pub fn mastery(&self) -> f64 {
        match self.homework_average {
            Some(homework) => (self.average_progress + homework) / 2.0,
            None => self.average_progress,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub lessons_total: i64,
    pub lessons_completed: i64,
    pub lessons_in_progress: i64,
    pub average_progress: f64,
    pub homework_pending: i64,
    pub homework_graded: i64,
    pub homework_average: Option<f64>,
    pub last_activity_at: Option<String>,
    pub subjects: Vec<SubjectScore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MistakeRecord {
    pub question_id: String,
    pub assignment_id: String,
    pub assignment_title_en: String,
    pub assignment_title_ar: String,
    pub subject_id: Option<String>,
    pub subject_name_en: String,
    pub subject_name_ar: String,
    pub question_type: String,
    pub text_en: String,
    pub text_ar: String,
    pub student_answer: Option<String>,
    pub correct_answer: Option<String>,
    pub submitted_at: Option<String>,
}

impl LearningStore {
    pub fn record_lesson_progress(
        &self,
        input: LessonProgressInput,
    ) -> Result<LessonProgressRecord, LearningRepoError> {
        let student_id = normalize_required_text(input.student_id.as_str(), "student_id")?;
        let lesson_id = normalize_required_text(input.lesson_id.as_str(), "lesson_id")?;
        let percent = input.progress_percent.clamp(0, 100);
        let status = match percent {
            0 => "not_started",
            100 => "completed",
            _ => "in_progress",
        };
        let now = now_iso();
        let completed_at = (percent == 100).then(|| now.clone());

        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO lesson_progress
                  (student_id, lesson_id, status, progress_percent, last_accessed_at, completed_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(student_id, lesson_id) DO UPDATE SET
                  status = excluded.status,
                  progress_percent = excluded.progress_percent,
                  last_accessed_at = excluded.last_accessed_at,
                  completed_at = COALESCE(lesson_progress.completed_at, excluded.completed_at)
            ",
                params![student_id, lesson_id, status, percent, now, completed_at],
            )?;
            fetch_progress(conn, student_id.as_str(), lesson_id.as_str())?
                .ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn list_lesson_progress(
        &self,
        student_id: &str,
    ) -> Result<Vec<LessonProgressRecord>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                format!("{PROGRESS_SELECT} WHERE p.student_id = ?1 ORDER BY p.last_accessed_at DESC")
                    .as_str(),
            )?;
            let rows = stmt.query_map([student_id], row_to_progress)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Per-subject lesson and homework scores, scoped to the student's grade when known.
    pub fn subject_scores(
        &self,
        student_id: &str,
        grade_level: Option<i64>,
    ) -> Result<Vec<SubjectScore>, LearningRepoError> {
        self.with_connection(|conn| subject_scores_on(conn, student_id, grade_level))
    }

    pub fn progress_summary(
        &self,
        student_id: &str,
        grade_level: Option<i64>,
    ) -> Result<ProgressSummary, LearningRepoError> {
        self.with_connection(|conn| {
            let subjects = subject_scores_on(conn, student_id, grade_level)?;
            let (lessons_completed, lessons_in_progress, average_progress, last_activity_at) = conn
                .query_row(
                    "
                    SELECT
                      COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                      COALESCE(SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END), 0),
                      COALESCE(AVG(progress_percent), 0.0),
                      MAX(last_accessed_at)
                    FROM lesson_progress
                    WHERE student_id = ?1
                ",
                    [student_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )?;
            let (homework_pending, homework_graded, homework_average) = conn.query_row(
                "
                SELECT
                  COALESCE(SUM(CASE WHEN s.status IN ('not_started', 'in_progress') THEN 1 ELSE 0 END), 0),
                  COALESCE(SUM(CASE WHEN s.status = 'graded' THEN 1 ELSE 0 END), 0),
                  AVG(CASE
                        WHEN s.status = 'graded' AND a.total_points > 0
                        THEN s.score * 100.0 / a.total_points
                      END)
                FROM submissions s
                JOIN assignments a ON a.id = s.assignment_id
                WHERE s.student_id = ?1
            ",
                [student_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                    ))
                },
            )?;

            Ok(ProgressSummary {
                lessons_total: subjects.iter().map(|s| s.lessons_total).sum(),
                lessons_completed,
                lessons_in_progress,
                average_progress,
                homework_pending,
                homework_graded,
                homework_average,
                last_activity_at,
                subjects,
            })
        })
    }

    /// Incorrectly answered questions from the student's submissions, newest first.
    pub fn list_mistakes(
        &self,
        student_id: &str,
        subject_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MistakeRecord>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT
                  q.id AS question_id, a.id AS assignment_id,
                  a.title_en, a.title_ar, a.subject_id,
                  COALESCE(sub.name_en, '') AS subject_name_en,
                  COALESCE(sub.name_ar, '') AS subject_name_ar,
                  q.question_type, q.text_en, q.text_ar,
                  ans.answer AS student_answer, q.correct_answer, s.submitted_at
                FROM submission_answers ans
                JOIN submissions s ON s.id = ans.submission_id
                JOIN assignment_questions q ON q.id = ans.question_id
                JOIN assignments a ON a.id = s.assignment_id
                LEFT JOIN subjects sub ON sub.id = a.subject_id
                WHERE s.student_id = ?1
                  AND ans.is_correct = 0
                  AND (?2 IS NULL OR a.subject_id = ?2)
                ORDER BY COALESCE(s.submitted_at, s.created_at) DESC, q.position ASC
                LIMIT ?3
            ",
            )?;
            let rows = stmt.query_map(params![student_id, subject_id, limit as i64], |row| {
                Ok(MistakeRecord {
                    question_id: row.get("question_id")?,
                    assignment_id: row.get("assignment_id")?,
                    assignment_title_en: row.get("title_en")?,
                    assignment_title_ar: row.get("title_ar")?,
                    subject_id: row.get("subject_id")?,
                    subject_name_en: row.get("subject_name_en")?,
                    subject_name_ar: row.get("subject_name_ar")?,
                    question_type: row.get("question_type")?,
                    text_en: row.get("text_en")?,
                    text_ar: row.get("text_ar")?,
                    student_answer: row.get("student_answer")?,
                    correct_answer: row.get("correct_answer")?,
                    submitted_at: row.get("submitted_at")?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}

pub(super) fn ensure_progress_tables(conn: &Connection) -> Result<(), LearningRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS lesson_progress (
          student_id TEXT NOT NULL,
          lesson_id TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'not_started',
          progress_percent INTEGER NOT NULL DEFAULT 0,
          last_accessed_at TEXT NOT NULL,
          completed_at TEXT,
          PRIMARY KEY(student_id, lesson_id),
          FOREIGN KEY(student_id) REFERENCES profiles(id) ON DELETE CASCADE,
          FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    )?;
    Ok(())
}

const PROGRESS_SELECT: &str = "
    SELECT
      p.lesson_id, l.title_en, l.title_ar, l.subject_id,
      p.status, p.progress_percent, p.last_accessed_at, p.completed_at
    FROM lesson_progress p
    JOIN lessons l ON l.id = p.lesson_id
";

fn fetch_progress(
    conn: &Connection,
    student_id: &str,
    lesson_id: &str,
) -> Result<Option<LessonProgressRecord>, LearningRepoError> {
    conn.query_row(
        format!("{PROGRESS_SELECT} WHERE p.student_id = ?1 AND p.lesson_id = ?2 LIMIT 1").as_str(),
        [student_id, lesson_id],
        row_to_progress,
    )
    .optional()
    .map_err(LearningRepoError::from)
}

fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<LessonProgressRecord> {
    Ok(LessonProgressRecord {
        lesson_id: row.get("lesson_id")?,
        lesson_title_en: row.get("title_en")?,
        lesson_title_ar: row.get("title_ar")?,
        subject_id: row.get("subject_id")?,
        status: row.get("status")?,
        progress_percent: row.get("progress_percent")?,
        last_accessed_at: row.get("last_accessed_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn subject_scores_on(
    conn: &Connection,
    student_id: &str,
    grade_level: Option<i64>,
) -> Result<Vec<SubjectScore>, LearningRepoError> {
    let mut stmt = conn.prepare(
        "
        SELECT
          s.id, s.name_en, s.name_ar,
          (SELECT COUNT(*) FROM lessons l
             WHERE l.subject_id = s.id AND l.is_published = 1
               AND (?2 IS NULL OR l.grade_level IS NULL OR l.grade_level = ?2)) AS lessons_total,
          (SELECT COUNT(*) FROM lesson_progress p JOIN lessons l ON l.id = p.lesson_id
             WHERE p.student_id = ?1 AND l.subject_id = s.id AND p.status = 'completed') AS lessons_completed,
          (SELECT COALESCE(AVG(p.progress_percent), 0.0) FROM lesson_progress p JOIN lessons l ON l.id = p.lesson_id
             WHERE p.student_id = ?1 AND l.subject_id = s.id) AS average_progress,
          (SELECT AVG(sb.score * 100.0 / a.total_points) FROM submissions sb JOIN assignments a ON a.id = sb.assignment_id
             WHERE sb.student_id = ?1 AND a.subject_id = s.id AND sb.status = 'graded' AND a.total_points > 0) AS homework_average,
          (SELECT COUNT(*) FROM submissions sb JOIN assignments a ON a.id = sb.assignment_id
             WHERE sb.student_id = ?1 AND a.subject_id = s.id AND sb.status = 'graded') AS graded_count
        FROM subjects s
        ORDER BY s.slug ASC
    ",
    )?;
    let rows = stmt.query_map(params![student_id, grade_level], |row| {
        Ok(SubjectScore {
            subject_id: row.get(0)?,
            name_en: row.get(1)?,
            name_ar: row.get(2)?,
            lessons_total: row.get(3)?,
            lessons_completed: row.get(4)?,
            average_progress: row.get(5)?,
            homework_average: row.get(6)?,
            graded_count: row.get(7)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
