//! Two-step homework creation: a preview (no writes) until the student agrees,
//! then a single committed bundle.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::learning::{
    to_iso, AssignmentBundleInput, NewQuestionRow, SubjectRecord, MAX_ASSIGNMENT_QUESTIONS,
};
use crate::i18n;
use crate::tutor::context::StudentContext;
use crate::tutor::tools::question_gen::{
    generate_questions, Difficulty, QuestionRequest, SubjectKind, DEFAULT_QUESTION_COUNT,
    POINTS_PER_QUESTION,
};
use crate::tutor::tools::{
    parse_params, store_failure, CallPolicy, ToolContext, ToolOutcome, TutorTool,
};

pub const TOOL_NAME: &str = "create_homework_assignment";
pub const PREVIEW_LOG_NAME: &str = "create_homework_assignment:preview";
const DEFAULT_DUE_DAYS: i64 = 7;

fn affirmative_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)^\s*(yes|yeah|yep|confirm|confirmed|ok|okay|sure|proceed|go ahead|do it|create it|نعم|أجل|اجل|موافق|موافقة|أوافق|اوافق|تمام|أكيد|اكيد|حسنا|حسنًا|طيب|أنشئه|انشئه)(\b|\s|[.!،,]|$)",
            )
            .ok()
        })
        .as_ref()
}

pub fn is_affirmative(text: &str) -> bool {
    affirmative_pattern().is_some_and(|pattern| pattern.is_match(text))
}

/// Explicit `confirm: true`, or the student's latest message says yes.
pub fn is_confirmed(student: &StudentContext, params: &Value) -> bool {
    params.get("confirm").and_then(Value::as_bool) == Some(true)
        || student
            .last_user_message
            .as_deref()
            .is_some_and(is_affirmative)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct QuestionParam {
    #[serde(default = "default_question_type")]
    question_type: String,
    text_en: String,
    #[serde(default)]
    text_ar: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Option<String>,
    #[serde(default)]
    points: Option<i64>,
}

fn default_question_type() -> String {
    String::from("short_answer")
}

#[derive(Debug, Deserialize)]
struct CreateHomeworkParams {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    subject_id: Option<String>,
    difficulty_level: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_ar: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    due_in_days: Option<i64>,
    #[serde(default)]
    question_count: Option<usize>,
    #[serde(default)]
    questions: Option<Vec<QuestionParam>>,
    #[serde(default)]
    draft_token: Option<String>,
}

pub struct CreateHomeworkAssignment;

#[async_trait]
impl TutorTool for CreateHomeworkAssignment {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Create a practice homework assignment for the student. The first call returns a preview \
         with needs_confirmation=true and writes nothing. Show the preview, ask the student, and \
         call again with the same parameters plus confirm=true and the draft_token once they agree."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject": {"type": "string", "description": "Subject id or name, in Arabic or English"},
                "subject_id": {"type": "string"},
                "difficulty_level": {"type": "string", "enum": ["easy", "medium", "hard"]},
                "topic": {"type": "string"},
                "title": {"type": "string"},
                "title_ar": {"type": "string"},
                "reason": {"type": "string", "description": "Why this practice helps the student"},
                "due_in_days": {"type": "integer", "minimum": 1, "maximum": 30},
                "question_count": {"type": "integer", "minimum": 1, "maximum": MAX_ASSIGNMENT_QUESTIONS},
                "questions": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": MAX_ASSIGNMENT_QUESTIONS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "question_type": {
                                "type": "string",
                                "enum": ["multiple_choice", "short_answer", "true_false", "essay"]
                            },
                            "text_en": {"type": "string", "minLength": 1},
                            "text_ar": {"type": "string"},
                            "options": {"type": "array", "items": {"type": "string"}},
                            "correct_answer": {"type": "string"},
                            "points": {"type": "integer", "minimum": 1, "maximum": 100}
                        },
                        "required": ["text_en"]
                    }
                },
                "confirm": {"type": "boolean"},
                "draft_token": {"type": "string"}
            },
            "required": ["difficulty_level"]
        })
    }

    fn call_policy(&self, student: &StudentContext, params: &Value) -> CallPolicy {
        if is_confirmed(student, params) {
            CallPolicy::Metered
        } else {
            CallPolicy::Logged
        }
    }

    fn log_name(&self, student: &StudentContext, params: &Value) -> String {
        if is_confirmed(student, params) {
            TOOL_NAME.to_string()
        } else {
            PREVIEW_LOG_NAME.to_string()
        }
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let confirmed = is_confirmed(ctx.student, &params);
        let params = match parse_params::<CreateHomeworkParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let Some(difficulty) = Difficulty::parse(params.difficulty_level.as_str()) else {
            return ToolOutcome::err("'difficulty_level' must be one of: easy, medium, hard");
        };
        if let Some(questions) = params.questions.as_ref() {
            if questions.len() > MAX_ASSIGNMENT_QUESTIONS {
                return ToolOutcome::err(format!(
                    "An assignment can have at most {MAX_ASSIGNMENT_QUESTIONS} questions"
                ));
            }
        }
        if params
            .question_count
            .is_some_and(|n| n == 0 || n > MAX_ASSIGNMENT_QUESTIONS)
        {
            return ToolOutcome::err(format!(
                "'question_count' must be between 1 and {MAX_ASSIGNMENT_QUESTIONS}"
            ));
        }

        let subjects = match ctx.store.run_blocking(|store| store.list_subjects()).await {
            Ok(subjects) => subjects,
            Err(error) => return store_failure(TOOL_NAME, error),
        };
        let wanted = params
            .subject_id
            .as_deref()
            .or(params.subject.as_deref())
            .unwrap_or("");
        let Some(subject) = resolve_subject(&subjects, wanted) else {
            let names = subjects
                .iter()
                .map(|s| format!("{} / {}", s.name_en, s.name_ar))
                .collect::<Vec<_>>()
                .join(", ");
            return ToolOutcome::err(format!(
                "Unknown subject '{wanted}'. Valid subjects: {names}"
            ));
        };

        let draft = build_draft(ctx.student, &params, subject, difficulty);
        let token = draft_token(subject, difficulty, &params);

        if !confirmed {
            return ToolOutcome::ok(preview_json(ctx.student, &draft, subject, token));
        }
        if let Some(supplied) = params.draft_token.as_deref() {
            if supplied != token {
                return ToolOutcome::err(
                    "The homework details changed since the preview. Show the student the new preview and ask again.",
                );
            }
        }

        let bundle = AssignmentBundleInput {
            student_id: ctx.student.student_id.clone(),
            subject_id: subject.id.clone(),
            conversation_id: ctx.student.conversation_id.clone(),
            title_en: draft.title_en.clone(),
            title_ar: draft.title_ar.clone(),
            instructions_en: draft.instructions_en.clone(),
            instructions_ar: draft.instructions_ar.clone(),
            due_at: draft.due_at.clone(),
            questions: draft.questions.clone(),
            reason: draft.reason.clone(),
            difficulty_level: difficulty.as_str().to_string(),
        };
        let committed = match ctx
            .store
            .run_blocking(move |store| store.commit_assignment_bundle(bundle))
            .await
        {
            Ok(committed) => committed,
            Err(error) => return store_failure(TOOL_NAME, error),
        };
        info!(
            student_id = %ctx.student.student_id,
            assignment_id = %committed.assignment_id,
            questions = committed.question_count,
            "ai homework assignment created"
        );

        let title = i18n::resolve(
            ctx.student.language,
            draft.title_ar.as_str(),
            draft.title_en.as_str(),
            "",
        );
        ToolOutcome::ok(json!({
            "status": "created",
            "assignment_id": committed.assignment_id,
            "submission_id": committed.submission_id,
            "title": title,
            "title_en": draft.title_en,
            "title_ar": draft.title_ar,
            "subject_id": subject.id,
            "subject_name": subject_name(ctx.student, subject),
            "difficulty_level": difficulty.as_str(),
            "question_count": committed.question_count,
            "total_points": committed.total_points,
            "due_at": draft.due_at,
            "message": ctx.student.text(
                format!(
                    "تم إنشاء الواجب \"{title}\" بعدد {} أسئلة ومجموع {} درجة. تجده الآن في قائمة واجباتك.",
                    committed.question_count, committed.total_points
                )
                .as_str(),
                format!(
                    "Created \"{title}\" with {} questions worth {} points. It is now in your homework list.",
                    committed.question_count, committed.total_points
                )
                .as_str(),
            ),
        }))
    }
}

struct Draft {
    title_en: String,
    title_ar: String,
    instructions_en: String,
    instructions_ar: String,
    reason: String,
    difficulty: Difficulty,
    due_in_days: i64,
    due_at: String,
    questions: Vec<NewQuestionRow>,
}

impl Draft {
    fn total_points(&self) -> i64 {
        self.questions.iter().map(|q| q.points).sum()
    }
}

fn build_draft(
    student: &StudentContext,
    params: &CreateHomeworkParams,
    subject: &SubjectRecord,
    difficulty: Difficulty,
) -> Draft {
    let topic = params
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let questions = match params.questions.as_ref() {
        Some(supplied) => supplied
            .iter()
            .map(|q| NewQuestionRow {
                question_type: q.question_type.clone(),
                text_ar: q
                    .text_ar
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| q.text_en.clone()),
                text_en: q.text_en.clone(),
                options: q.options.clone(),
                correct_answer: q.correct_answer.clone(),
                points: q.points.unwrap_or(POINTS_PER_QUESTION),
            })
            .collect(),
        None => {
            let request = QuestionRequest {
                kind: SubjectKind::detect(
                    subject.slug.as_str(),
                    subject.name_en.as_str(),
                    subject.name_ar.as_str(),
                ),
                topic_en: topic.unwrap_or(subject.name_en.as_str()),
                topic_ar: topic.unwrap_or(subject.name_ar.as_str()),
                difficulty,
                count: params.question_count.unwrap_or(DEFAULT_QUESTION_COUNT),
                grade_level: student.grade_level,
            };
            generate_questions(&request, &mut rand::thread_rng())
        }
    };

    let (default_en, default_ar) = match topic {
        Some(topic) => (
            format!("{} practice: {topic}", subject.name_en),
            format!("تمارين {}: {topic}", subject.name_ar),
        ),
        None => (
            format!("{} practice", subject.name_en),
            format!("تمارين {}", subject.name_ar),
        ),
    };
    let title_en = params
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(default_en);
    let title_ar = params
        .title_ar
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(default_ar);
    let due_in_days = params.due_in_days.unwrap_or(DEFAULT_DUE_DAYS).clamp(1, 30);

    Draft {
        title_en,
        title_ar,
        instructions_en: String::from("Answer every question. Show your work where you can."),
        instructions_ar: String::from("أجب عن جميع الأسئلة، ووضح طريقة الحل كلما أمكن."),
        reason: params
            .reason
            .clone()
            .unwrap_or_else(|| String::from("Practice requested by the student")),
        difficulty,
        due_in_days,
        due_at: to_iso(Utc::now() + Duration::days(due_in_days)),
        questions,
    }
}

fn preview_json(student: &StudentContext, draft: &Draft, subject: &SubjectRecord, token: String) -> Value {
    let lang = student.language;
    let title = i18n::resolve(lang, draft.title_ar.as_str(), draft.title_en.as_str(), "");
    let subject_name = subject_name(student, subject);
    let difficulty_label = student.text(draft.difficulty.label_ar(), draft.difficulty.as_str());
    let questions = draft
        .questions
        .iter()
        .map(|q| {
            json!({
                "question_type": q.question_type,
                "text": i18n::resolve(lang, q.text_ar.as_str(), q.text_en.as_str(), ""),
                "points": q.points,
            })
        })
        .collect::<Vec<_>>();
    let total_points = draft.total_points();
    let count = draft.questions.len();
    json!({
        "status": "draft",
        "needs_confirmation": true,
        "draft_token": token,
        "title": title,
        "title_en": draft.title_en,
        "title_ar": draft.title_ar,
        "subject_id": subject.id,
        "subject_name": subject_name,
        "difficulty_level": draft.difficulty.as_str(),
        "difficulty": difficulty_label,
        "reason": draft.reason,
        "question_count": count,
        "total_points": total_points,
        "due_in_days": draft.due_in_days,
        "questions": questions,
        "message": student.text(
            format!(
                "معاينة الواجب: \"{title}\" في مادة {subject_name}، مستوى {difficulty_label}، {count} أسئلة بمجموع {total_points} درجة، والتسليم خلال {} أيام. هل تريد أن أنشئ هذا الواجب؟",
                draft.due_in_days
            )
            .as_str(),
            format!(
                "Homework preview: \"{title}\" in {subject_name}, {difficulty_label} level, {count} questions worth {total_points} points, due in {} days. Shall I create it?",
                draft.due_in_days
            )
            .as_str(),
        ),
    })
}

fn subject_name(student: &StudentContext, subject: &SubjectRecord) -> String {
    i18n::resolve(
        student.language,
        subject.name_ar.as_str(),
        subject.name_en.as_str(),
        subject.slug.as_str(),
    )
}

/// Id, slug or exact name first; then containment either way.
fn resolve_subject<'a>(subjects: &'a [SubjectRecord], wanted: &str) -> Option<&'a SubjectRecord> {
    let wanted = wanted.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let names = |s: &SubjectRecord| [s.slug.to_lowercase(), s.name_en.to_lowercase(), s.name_ar.clone()];
    subjects
        .iter()
        .find(|s| s.id == wanted || names(s).iter().any(|n| *n == wanted))
        .or_else(|| {
            subjects.iter().find(|s| {
                names(s)
                    .iter()
                    .filter(|n| !n.is_empty())
                    .any(|n| n.contains(wanted.as_str()) || wanted.contains(n.as_str()))
            })
        })
}

/// Fingerprint of the student-visible draft parameters. Generated operands are not part of it.
fn draft_token(subject: &SubjectRecord, difficulty: Difficulty, params: &CreateHomeworkParams) -> String {
    let normalized = json!({
        "subject_id": subject.id,
        "difficulty": difficulty.as_str(),
        "topic": params.topic.as_deref().map(str::trim).unwrap_or(""),
        "title": params.title.as_deref().map(str::trim).unwrap_or(""),
        "title_ar": params.title_ar.as_deref().map(str::trim).unwrap_or(""),
        "due_in_days": params.due_in_days.unwrap_or(DEFAULT_DUE_DAYS),
        "question_count": params.question_count.unwrap_or(DEFAULT_QUESTION_COUNT),
        "questions": params.questions,
    });
    let digest = Sha256::digest(normalized.to_string().as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
