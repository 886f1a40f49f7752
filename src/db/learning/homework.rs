use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use super::profiles::{fetch_profile, find_any_teacher_id};
use super::{new_id, normalize_required_text, now_iso, LearningRepoError, LearningStore};

pub const MAX_ASSIGNMENT_QUESTIONS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct HomeworkListEntry {
    pub assignment_id: String,
    pub submission_id: String,
    pub title_en: String,
    pub title_ar: String,
    pub subject_id: Option<String>,
    pub subject_name_en: String,
    pub subject_name_ar: String,
    pub due_at: Option<String>,
    pub total_points: i64,
    pub status: String,
    pub score: Option<f64>,
    pub submitted_at: Option<String>,
    pub is_ai_generated: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentQuestionRecord {
    pub id: String,
    pub position: i64,
    pub question_type: String,
    pub text_en: String,
    pub text_ar: String,
    pub options: Vec<String>,
    pub correct_answer: Option<String>,
    pub points: i64,
    pub student_answer: Option<String>,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentDetailRecord {
    pub entry: HomeworkListEntry,
    pub instructions_en: String,
    pub instructions_ar: String,
    pub questions: Vec<AssignmentQuestionRecord>,
    pub ai_reason: Option<String>,
    pub ai_difficulty: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewQuestionRow {
    pub question_type: String,
    pub text_en: String,
    pub text_ar: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    pub points: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentBundleInput {
    pub student_id: String,
    pub subject_id: String,
    pub conversation_id: Option<String>,
    pub title_en: String,
    pub title_ar: String,
    pub instructions_en: String,
    pub instructions_ar: String,
    pub due_at: String,
    pub questions: Vec<NewQuestionRow>,
    pub reason: String,
    pub difficulty_level: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommittedAssignment {
    pub assignment_id: String,
    pub submission_id: String,
    pub cohort_id: String,
    pub created_by: String,
    pub total_points: i64,
    pub question_count: usize,
}

impl LearningStore {
    pub fn list_student_homework(
        &self,
        student_id: &str,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HomeworkListEntry>, LearningRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                format!(
                    "{HOMEWORK_SELECT}
                     WHERE s.student_id = ?1 AND (?2 IS NULL OR s.status = ?2)
                     ORDER BY a.created_at DESC, a.rowid DESC
                     LIMIT ?3"
                )
                .as_str(),
            )?;
            let rows = stmt.query_map(params![student_id, status, limit as i64], row_to_entry)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Only resolves assignments the student holds a submission for.
    pub fn get_homework_detail(
        &self,
        student_id: &str,
        assignment_id: &str,
    ) -> Result<AssignmentDetailRecord, LearningRepoError> {
        self.with_connection(|conn| {
            let (entry, instructions_en, instructions_ar) = conn
                .query_row(
                    format!(
                        "{HOMEWORK_SELECT} WHERE s.student_id = ?1 AND a.id = ?2 LIMIT 1"
                    )
                    .as_str(),
                    [student_id, assignment_id],
                    |row| {
                        Ok((
                            row_to_entry(row)?,
                            row.get::<_, String>("instructions_en")?,
                            row.get::<_, String>("instructions_ar")?,
                        ))
                    },
                )
                .optional()?
                .ok_or(LearningRepoError::NotFound)?;

            let mut stmt = conn.prepare(
                "
                SELECT
                  q.id, q.position, q.question_type, q.text_en, q.text_ar, q.options_json,
                  q.correct_answer, q.points, ans.answer, ans.is_correct
                FROM assignment_questions q
                LEFT JOIN submission_answers ans
                  ON ans.question_id = q.id AND ans.submission_id = ?2
                WHERE q.assignment_id = ?1
                ORDER BY q.position ASC
            ",
            )?;
            let rows = stmt.query_map(
                [assignment_id, entry.submission_id.as_str()],
                |row| {
                    let options_json = row.get::<_, Option<String>>(5)?;
                    Ok(AssignmentQuestionRecord {
                        id: row.get(0)?,
                        position: row.get(1)?,
                        question_type: row.get(2)?,
                        text_en: row.get(3)?,
                        text_ar: row.get(4)?,
                        options: options_json
                            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw.as_str()).ok())
                            .unwrap_or_default(),
                        correct_answer: row.get(6)?,
                        points: row.get(7)?,
                        student_answer: row.get(8)?,
                        is_correct: row.get::<_, Option<i64>>(9)?.map(|v| v != 0),
                    })
                },
            )?;
            let mut questions = Vec::new();
            for row in rows {
                questions.push(row?);
            }

            let provenance = conn
                .query_row(
                    "
                    SELECT reason, difficulty_level
                    FROM ai_assignment_provenance
                    WHERE assignment_id = ?1
                    LIMIT 1
                ",
                    [assignment_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let (ai_reason, ai_difficulty) = match provenance {
                Some((reason, difficulty)) => (Some(reason), Some(difficulty)),
                None => (None, None),
            };

            Ok(AssignmentDetailRecord {
                entry,
                instructions_en,
                instructions_ar,
                questions,
                ai_reason,
                ai_difficulty,
            })
        })
    }

    /// Writes the cohort (when missing), assignment, questions, submission and provenance
    /// in one transaction.
    pub fn commit_assignment_bundle(
        &self,
        input: AssignmentBundleInput,
    ) -> Result<CommittedAssignment, LearningRepoError> {
        let student_id = normalize_required_text(input.student_id.as_str(), "student_id")?;
        let subject_id = normalize_required_text(input.subject_id.as_str(), "subject_id")?;
        if input.questions.is_empty() {
            return Err(LearningRepoError::Validation(String::from(
                "Assignment needs at least one question",
            )));
        }
        if input.questions.len() > MAX_ASSIGNMENT_QUESTIONS {
            return Err(LearningRepoError::Validation(format!(
                "Assignment cannot have more than {MAX_ASSIGNMENT_QUESTIONS} questions"
            )));
        }

        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let profile = fetch_profile(&tx, student_id.as_str())?.ok_or_else(|| {
                LearningRepoError::Validation(format!("Unknown student '{student_id}'"))
            })?;
            let created_by = find_any_teacher_id(&tx)?.unwrap_or_else(|| profile.id.clone());
            let cohort_id = match active_cohort_for(&tx, profile.id.as_str())? {
                Some(id) => id,
                None => create_personal_cohort(
                    &tx,
                    profile.id.as_str(),
                    profile.full_name.as_str(),
                    profile.grade_level,
                )?,
            };

            let now = now_iso();
            let assignment_id = new_id();
            let total_points = input.questions.iter().map(|q| q.points).sum::<i64>();
            tx.execute(
                "
                INSERT INTO assignments
                  (id, cohort_id, subject_id, created_by, title_en, title_ar,
                   instructions_en, instructions_ar, due_at, total_points, status,
                   is_ai_generated, created_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'published', 1, ?11)
            ",
                params![
                    assignment_id,
                    cohort_id,
                    subject_id,
                    created_by,
                    input.title_en,
                    input.title_ar,
                    input.instructions_en,
                    input.instructions_ar,
                    input.due_at,
                    total_points,
                    now
                ],
            )?;

            insert_questions(&tx, assignment_id.as_str(), &input.questions)?;

            let submission_id = new_id();
            tx.execute(
                "
                INSERT INTO submissions
                  (id, assignment_id, student_id, status, score, submitted_at, graded_at, created_at)
                VALUES
                  (?1, ?2, ?3, 'not_started', NULL, NULL, NULL, ?4)
            ",
                params![submission_id, assignment_id, profile.id, now],
            )?;

            tx.execute(
                "
                INSERT INTO ai_assignment_provenance
                  (assignment_id, student_id, conversation_id, reason, difficulty_level, created_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6)
            ",
                params![
                    assignment_id,
                    profile.id,
                    input.conversation_id,
                    input.reason,
                    input.difficulty_level,
                    now
                ],
            )?;

            tx.commit()?;
            Ok(CommittedAssignment {
                assignment_id,
                submission_id,
                cohort_id,
                created_by,
                total_points,
                question_count: input.questions.len(),
            })
        })
    }
}

pub(super) fn ensure_homework_tables(conn: &Connection) -> Result<(), LearningRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cohorts (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          grade_level INTEGER,
          teacher_id TEXT,
          is_active INTEGER NOT NULL DEFAULT 1,
          is_ai_generated INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cohort_members (
          cohort_id TEXT NOT NULL,
          student_id TEXT NOT NULL,
          joined_at TEXT NOT NULL,
          PRIMARY KEY(cohort_id, student_id),
          FOREIGN KEY(cohort_id) REFERENCES cohorts(id) ON DELETE CASCADE,
          FOREIGN KEY(student_id) REFERENCES profiles(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS assignments (
          id TEXT PRIMARY KEY,
          cohort_id TEXT NOT NULL,
          subject_id TEXT,
          created_by TEXT NOT NULL,
          title_en TEXT NOT NULL DEFAULT '',
          title_ar TEXT NOT NULL DEFAULT '',
          instructions_en TEXT NOT NULL DEFAULT '',
          instructions_ar TEXT NOT NULL DEFAULT '',
          due_at TEXT,
          total_points INTEGER NOT NULL DEFAULT 0,
          status TEXT NOT NULL DEFAULT 'published',
          is_ai_generated INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          FOREIGN KEY(cohort_id) REFERENCES cohorts(id) ON DELETE CASCADE,
          FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS assignment_questions (
          id TEXT PRIMARY KEY,
          assignment_id TEXT NOT NULL,
          position INTEGER NOT NULL,
          question_type TEXT NOT NULL,
          text_en TEXT NOT NULL DEFAULT '',
          text_ar TEXT NOT NULL DEFAULT '',
          options_json TEXT,
          correct_answer TEXT,
          points INTEGER NOT NULL DEFAULT 0,
          FOREIGN KEY(assignment_id) REFERENCES assignments(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS submissions (
          id TEXT PRIMARY KEY,
          assignment_id TEXT NOT NULL,
          student_id TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'not_started',
          score REAL,
          submitted_at TEXT,
          graded_at TEXT,
          created_at TEXT NOT NULL,
          UNIQUE(assignment_id, student_id),
          FOREIGN KEY(assignment_id) REFERENCES assignments(id) ON DELETE CASCADE,
          FOREIGN KEY(student_id) REFERENCES profiles(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS submission_answers (
          id TEXT PRIMARY KEY,
          submission_id TEXT NOT NULL,
          question_id TEXT NOT NULL,
          answer TEXT,
          is_correct INTEGER,
          UNIQUE(submission_id, question_id),
          FOREIGN KEY(submission_id) REFERENCES submissions(id) ON DELETE CASCADE,
          FOREIGN KEY(question_id) REFERENCES assignment_questions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS ai_assignment_provenance (
          assignment_id TEXT PRIMARY KEY,
          student_id TEXT NOT NULL,
          conversation_id TEXT,
          reason TEXT NOT NULL DEFAULT '',
          difficulty_level TEXT NOT NULL,
          created_at TEXT NOT NULL,
          FOREIGN KEY(assignment_id) REFERENCES assignments(id) ON DELETE CASCADE
        );
    ",
    )?;
    Ok(())
}

const HOMEWORK_SELECT: &str = "
    SELECT
      a.id AS assignment_id, s.id AS submission_id,
      a.title_en, a.title_ar, a.subject_id,
      COALESCE(sub.name_en, '') AS subject_name_en,
      COALESCE(sub.name_ar, '') AS subject_name_ar,
      a.due_at, a.total_points, a.instructions_en, a.instructions_ar,
      s.status, s.score, s.submitted_at, a.is_ai_generated, a.created_at
    FROM submissions s
    JOIN assignments a ON a.id = s.assignment_id
    LEFT JOIN subjects sub ON sub.id = a.subject_id
";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HomeworkListEntry> {
    Ok(HomeworkListEntry {
        assignment_id: row.get("assignment_id")?,
        submission_id: row.get("submission_id")?,
        title_en: row.get("title_en")?,
        title_ar: row.get("title_ar")?,
        subject_id: row.get("subject_id")?,
        subject_name_en: row.get("subject_name_en")?,
        subject_name_ar: row.get("subject_name_ar")?,
        due_at: row.get("due_at")?,
        total_points: row.get("total_points")?,
        status: row.get("status")?,
        score: row.get("score")?,
        submitted_at: row.get("submitted_at")?,
        is_ai_generated: row.get::<_, i64>("is_ai_generated")? != 0,
        created_at: row.get("created_at")?,
    })
}

fn active_cohort_for(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<String>, LearningRepoError> {
    conn.query_row(
        "
        SELECT c.id
        FROM cohorts c
        JOIN cohort_members m ON m.cohort_id = c.id
        WHERE m.student_id = ?1 AND c.is_active = 1
        ORDER BY c.is_ai_generated ASC, c.created_at ASC
        LIMIT 1
    ",
        [student_id],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(LearningRepoError::from)
}

fn create_personal_cohort(
    tx: &Transaction<'_>,
    student_id: &str,
    student_name: &str,
    grade_level: Option<i64>,
) -> Result<String, LearningRepoError> {
    let cohort_id = new_id();
    let now = now_iso();
    tx.execute(
        "
        INSERT INTO cohorts (id, name, grade_level, teacher_id, is_active, is_ai_generated, created_at)
        VALUES (?1, ?2, ?3, NULL, 1, 1, ?4)
    ",
        params![
            cohort_id,
            format!("AI Practice - {student_name}"),
            grade_level,
            now
        ],
    )?;
    tx.execute(
        "INSERT INTO cohort_members (cohort_id, student_id, joined_at) VALUES (?1, ?2, ?3)",
        params![cohort_id, student_id, now],
    )?;
    Ok(cohort_id)
}

fn insert_questions(
    tx: &Transaction<'_>,
    assignment_id: &str,
    questions: &[NewQuestionRow],
) -> Result<(), LearningRepoError> {
    let mut stmt = tx.prepare(
        "
        INSERT INTO assignment_questions
          (id, assignment_id, position, question_type, text_en, text_ar, options_json,
           correct_answer, points)
        VALUES
          (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ",
    )?;
    for (position, question) in questions.iter().enumerate() {
        let options_json = if question.options.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&question.options).map_err(|e| {
                LearningRepoError::Internal(format!("options encode failed: {e}"))
            })?)
        };
        stmt.execute(params![
            new_id(),
            assignment_id,
            position as i64,
            question.question_type,
            question.text_en,
            question.text_ar,
            options_json,
            question.correct_answer,
            question.points
        ])?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use crate::db::learning::test_support::temp_store;
    use crate::db::learning::{UpsertProfileInput, UpsertSubjectInput};

    use super::test_support::SubmissionAnswerInput;
    use super::*;

    fn question(points: i64, answer: &str) -> NewQuestionRow {
        NewQuestionRow {
            question_type: String::from("short_answer"),
            text_en: String::from("2 + 2 = ?"),
            text_ar: String::from("٢ + ٢ = ؟"),
            options: Vec::new(),
            correct_answer: Some(answer.to_string()),
            points,
        }
    }

    fn bundle(student_id: &str, subject_id: &str, questions: Vec<NewQuestionRow>) -> AssignmentBundleInput {
        AssignmentBundleInput {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            title_en: String::from("Addition practice"),
            title_ar: String::from("تمارين الجمع"),
            due_at: String::from("2026-03-08T00:00:00Z"),
            questions,
            reason: String::from("student asked"),
            difficulty_level: String::from("easy"),
            ..AssignmentBundleInput::default()
        }
    }

    #[test]
    fn commit_writes_every_row_and_reuses_personal_cohort() {
        let store = temp_store();
        let student = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("Lina"),
                grade_level: Some(3),
                ..UpsertProfileInput::default()
            })
            .expect("profile");
        let subject = store
            .upsert_subject(UpsertSubjectInput {
                slug: String::from("math"),
                name_en: String::from("Math"),
                ..UpsertSubjectInput::default()
            })
            .expect("subject");

        let first = store
            .commit_assignment_bundle(bundle(
                student.id.as_str(),
                subject.id.as_str(),
                vec![question(10, "4"), question(15, "4")],
            ))
            .expect("commit");
        assert_eq!(first.total_points, 25);
        assert_eq!(first.created_by, student.id);

        let second = store
            .commit_assignment_bundle(bundle(
                student.id.as_str(),
                subject.id.as_str(),
                vec![question(10, "4")],
            ))
            .expect("commit");
        assert_eq!(first.cohort_id, second.cohort_id);

        let detail = store
            .get_homework_detail(student.id.as_str(), first.assignment_id.as_str())
            .expect("detail");
        assert_eq!(detail.questions.len(), 2);
        assert_eq!(detail.entry.status, "not_started");
        assert_eq!(detail.ai_difficulty.as_deref(), Some("easy"));

        let graded = store
            .grade_submission(
                student.id.as_str(),
                first.assignment_id.as_str(),
                vec![
                    SubmissionAnswerInput {
                        question_id: detail.questions[0].id.clone(),
                        answer: String::from("4"),
                    },
                    SubmissionAnswerInput {
                        question_id: detail.questions[1].id.clone(),
                        answer: String::from("5"),
                    },
                ],
            )
            .expect("grade");
        assert_eq!(graded.status, "graded");
        assert_eq!(graded.score, Some(10.0));
        let mistakes = store
            .list_mistakes(student.id.as_str(), None, 10)
            .expect("mistakes");
        assert_eq!(mistakes.len(), 1);
        assert_eq!(mistakes[0].student_answer.as_deref(), Some("5"));
    }

    #[test]
    fn failed_commit_leaves_no_cohort_or_assignment_behind() {
        let store = temp_store();
        let student = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("Lina"),
                ..UpsertProfileInput::default()
            })
            .expect("profile");

        let err = store.commit_assignment_bundle(bundle(
            student.id.as_str(),
            "missing-subject",
            vec![question(10, "4")],
        ));
        assert!(err.is_err());
        assert!(store
            .student_cohort_id(student.id.as_str())
            .expect("lookup")
            .is_none());
        assert!(store
            .list_student_homework(student.id.as_str(), None, 10)
            .expect("list")
            .is_empty());
    }

    #[test]
    fn oversized_bundle_is_rejected() {
        let store = temp_store();
        let questions = (0..11).map(|_| question(10, "1")).collect::<Vec<_>>();
        let err = store
            .commit_assignment_bundle(bundle("s", "m", questions))
            .expect_err("cap must hold");
        assert!(matches!(err, LearningRepoError::Validation(_)));
    }
}
