use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::learning::{AssignmentQuestionRecord, HomeworkListEntry};
use crate::i18n::{self, Language};
use crate::tutor::context::StudentContext;
use crate::tutor::tools::{
    parse_params, store_failure, CallPolicy, ToolContext, ToolOutcome, TutorTool,
};

pub(crate) fn homework_json(lang: Language, entry: &HomeworkListEntry) -> Value {
    json!({
        "assignment_id": entry.assignment_id,
        "submission_id": entry.submission_id,
        "title_en": entry.title_en,
        "title_ar": entry.title_ar,
        "title": i18n::resolve(lang, entry.title_ar.as_str(), entry.title_en.as_str(), ""),
        "subject_id": entry.subject_id,
        "subject_name": i18n::resolve(
            lang,
            entry.subject_name_ar.as_str(),
            entry.subject_name_en.as_str(),
            "",
        ),
        "due_at": entry.due_at,
        "total_points": entry.total_points,
        "status": entry.status,
        "score": entry.score,
        "submitted_at": entry.submitted_at,
        "is_ai_generated": entry.is_ai_generated,
    })
}

#[derive(Debug, Deserialize)]
struct HomeworkListParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct GetStudentHomework;

#[async_trait]
impl TutorTool for GetStudentHomework {
    fn name(&self) -> &'static str {
        "get_student_homework"
    }

    fn description(&self) -> &'static str {
        "List the student's homework assignments, newest first, optionally filtered by submission status."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["not_started", "in_progress", "submitted", "graded"]
                },
                "limit": {"type": "integer", "minimum": 1, "maximum": 50}
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<HomeworkListParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let student_id = ctx.student.student_id.clone();
        let limit = params.limit.unwrap_or(20);
        let entries = match ctx
            .store
            .run_blocking(move |store| {
                store.list_student_homework(student_id.as_str(), params.status.as_deref(), limit)
            })
            .await
        {
            Ok(entries) => entries,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let pending = entries
            .iter()
            .filter(|e| e.status == "not_started" || e.status == "in_progress")
            .count();
        let items = entries
            .iter()
            .map(|e| homework_json(lang, e))
            .collect::<Vec<_>>();
        ToolOutcome::ok(json!({
            "count": items.len(),
            "pending": pending,
            "homework": items,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct HomeworkDetailParams {
    assignment_id: String,
}

pub struct GetHomeworkDetails;

#[async_trait]
impl TutorTool for GetHomeworkDetails {
    fn name(&self) -> &'static str {
        "get_homework_details"
    }

    fn description(&self) -> &'static str {
        "Get one homework assignment with its instructions and questions. Correct answers are only included once the work is graded."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "assignment_id": {"type": "string", "minLength": 1}
            },
            "required": ["assignment_id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<HomeworkDetailParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let student_id = ctx.student.student_id.clone();
        let detail = match ctx
            .store
            .run_blocking(move |store| {
                store.get_homework_detail(student_id.as_str(), params.assignment_id.as_str())
            })
            .await
        {
            Ok(detail) => detail,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let graded = detail.entry.status == "graded";
        let questions = detail
            .questions
            .iter()
            .map(|q| question_json(lang, q, graded))
            .collect::<Vec<_>>();
        let mut out = homework_json(lang, &detail.entry);
        out["instructions_en"] = json!(detail.instructions_en);
        out["instructions_ar"] = json!(detail.instructions_ar);
        out["instructions"] = json!(i18n::resolve(
            lang,
            detail.instructions_ar.as_str(),
            detail.instructions_en.as_str(),
            "",
        ));
        out["questions"] = json!(questions);
        out["ai_reason"] = json!(detail.ai_reason);
        out["difficulty_level"] = json!(detail.ai_difficulty);
        ToolOutcome::ok(out)
    }
}

fn question_json(lang: Language, question: &AssignmentQuestionRecord, graded: bool) -> Value {
    let mut item = json!({
        "question_id": question.id,
        "position": question.position,
        "question_type": question.question_type,
        "text_en": question.text_en,
        "text_ar": question.text_ar,
        "text": i18n::resolve(lang, question.text_ar.as_str(), question.text_en.as_str(), ""),
        "options": question.options,
        "points": question.points,
        "student_answer": question.student_answer,
    });
    if graded {
        item["correct_answer"] = json!(question.correct_answer);
        item["is_correct"] = json!(question.is_correct);
    }
    item
}

#[derive(Debug, Deserialize)]
struct MistakeParams {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Groups wrong answers by subject and question type.
pub struct GetMistakePatterns;

#[async_trait]
impl TutorTool for GetMistakePatterns {
    fn name(&self) -> &'static str {
        "get_mistake_patterns"
    }

    fn description(&self) -> &'static str {
        "Analyse the student's wrong homework answers and group them by subject and question type."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject_id": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100}
            }
        })
    }

    fn call_policy(&self, _student: &StudentContext, _params: &Value) -> CallPolicy {
        CallPolicy::Metered
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<MistakeParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let student_id = ctx.student.student_id.clone();
        let limit = params.limit.unwrap_or(50);
        let mistakes = match ctx
            .store
            .run_blocking(move |store| {
                store.list_mistakes(student_id.as_str(), params.subject_id.as_deref(), limit)
            })
            .await
        {
            Ok(mistakes) => mistakes,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        if mistakes.is_empty() {
            return ToolOutcome::ok(json!({
                "total_mistakes": 0,
                "patterns": [],
                "note": ctx.student.text(
                    "لا توجد أخطاء مسجلة في الواجبات المصححة.",
                    "No mistakes recorded in graded homework.",
                ),
            }));
        }

        let mut groups = BTreeMap::<(String, String), Vec<_>>::new();
        for mistake in &mistakes {
            let subject = i18n::resolve(
                lang,
                mistake.subject_name_ar.as_str(),
                mistake.subject_name_en.as_str(),
                "",
            );
            groups
                .entry((subject, mistake.question_type.clone()))
                .or_default()
                .push(mistake);
        }
        let mut patterns = groups
            .into_iter()
            .map(|((subject, question_type), items)| {
                let examples = items
                    .iter()
                    .take(3)
                    .map(|m| {
                        json!({
                            "question": i18n::resolve(lang, m.text_ar.as_str(), m.text_en.as_str(), ""),
                            "student_answer": m.student_answer,
                            "correct_answer": m.correct_answer,
                        })
                    })
                    .collect::<Vec<_>>();
                json!({
                    "subject_name": subject,
                    "subject_id": items.first().and_then(|m| m.subject_id.clone()),
                    "question_type": question_type,
                    "count": items.len(),
                    "examples": examples,
                })
            })
            .collect::<Vec<_>>();
        patterns.sort_by(|a, b| {
            b["count"]
                .as_u64()
                .unwrap_or_default()
                .cmp(&a["count"].as_u64().unwrap_or_default())
        });

        ToolOutcome::ok(json!({
            "total_mistakes": mistakes.len(),
            "patterns": patterns,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::db::learning::{AssignmentBundleInput, NewQuestionRow, SubmissionAnswerInput};
    use crate::tutor::tools::test_support::{fixture, Fixture};

    use super::*;

    fn assign(fx: &Fixture) -> String {
        let question = |en: &str, answer: &str| NewQuestionRow {
            question_type: String::from("short_answer"),
            text_en: en.to_string(),
            text_ar: String::new(),
            options: Vec::new(),
            correct_answer: Some(answer.to_string()),
            points: 10,
        };
        fx.store
            .commit_assignment_bundle(AssignmentBundleInput {
                student_id: fx.student.student_id.clone(),
                subject_id: fx.math_id.clone(),
                title_en: String::from("Addition practice"),
                title_ar: String::from("تمارين الجمع"),
                due_at: String::from("2026-11-01T00:00:00Z"),
                questions: vec![question("12 + 5 = ?", "17"), question("30 + 9 = ?", "39")],
                reason: String::from("practice"),
                difficulty_level: String::from("easy"),
                ..AssignmentBundleInput::default()
            })
            .expect("assignment")
            .assignment_id
    }

    #[tokio::test]
    async fn homework_list_resolves_titles() {
        let fx = fixture(Language::Ar);
        assign(&fx);
        let out = GetStudentHomework
            .execute(&fx.ctx(), json!({}))
            .await
            .into_planner_value();
        assert_eq!(out["count"], 1);
        assert_eq!(out["pending"], 1);
        assert_eq!(out["homework"][0]["title"], "تمارين الجمع");
        assert_eq!(out["homework"][0]["subject_name"], "الرياضيات");
        assert_eq!(out["homework"][0]["total_points"], 20);
    }

    #[tokio::test]
    async fn details_hide_answers_until_graded() {
        let fx = fixture(Language::En);
        let assignment_id = assign(&fx);
        let before = GetHomeworkDetails
            .execute(&fx.ctx(), json!({"assignment_id": assignment_id}))
            .await
            .into_planner_value();
        assert!(before["questions"][0].get("correct_answer").is_none());
        assert_eq!(before["difficulty_level"], "easy");

        let detail = fx
            .store
            .get_homework_detail(fx.student.student_id.as_str(), assignment_id.as_str())
            .expect("detail");
        let answers = detail
            .questions
            .iter()
            .map(|q| SubmissionAnswerInput {
                question_id: q.id.clone(),
                answer: String::from("17"),
            })
            .collect();
        fx.store
            .grade_submission(fx.student.student_id.as_str(), assignment_id.as_str(), answers)
            .expect("grade");

        let after = GetHomeworkDetails
            .execute(&fx.ctx(), json!({"assignment_id": assignment_id}))
            .await
            .into_planner_value();
        assert_eq!(after["status"], "graded");
        assert_eq!(after["questions"][1]["correct_answer"], "39");
        assert_eq!(after["questions"][1]["is_correct"], false);
    }

    #[tokio::test]
    async fn details_for_other_students_are_not_found() {
        let fx = fixture(Language::En);
        let assignment_id = assign(&fx);
        let stranger = crate::tutor::context::test_context("someone-else", Language::En);
        let out = GetHomeworkDetails
            .execute(&fx.ctx_for(&stranger), json!({"assignment_id": assignment_id}))
            .await;
        assert_eq!(out, ToolOutcome::err("Record not found"));
    }

    #[tokio::test]
    async fn mistakes_are_grouped_by_subject_and_type() {
        let fx = fixture(Language::En);
        let assignment_id = assign(&fx);
        let detail = fx
            .store
            .get_homework_detail(fx.student.student_id.as_str(), assignment_id.as_str())
            .expect("detail");
        let answers = detail
            .questions
            .iter()
            .map(|q| SubmissionAnswerInput {
                question_id: q.id.clone(),
                answer: String::from("0"),
            })
            .collect();
        fx.store
            .grade_submission(fx.student.student_id.as_str(), assignment_id.as_str(), answers)
            .expect("grade");

        let out = GetMistakePatterns
            .execute(&fx.ctx(), json!({}))
            .await
            .into_planner_value();
        assert_eq!(out["total_mistakes"], 2);
        assert_eq!(out["patterns"][0]["subject_name"], "Mathematics");
        assert_eq!(out["patterns"][0]["question_type"], "short_answer");
        assert_eq!(out["patterns"][0]["count"], 2);
    }
}
