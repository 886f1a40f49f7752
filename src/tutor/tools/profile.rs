use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::learning::SubjectScore;
use crate::i18n;
use crate::tutor::tools::{parse_params, store_failure, ToolContext, ToolOutcome, TutorTool};

pub struct GetStudentProfile;

#[async_trait]
impl TutorTool for GetStudentProfile {
    fn name(&self) -> &'static str {
        "get_student_profile"
    }

    fn description(&self) -> &'static str {
        "Get the current student's name, grade level and preferred language."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _params: Value) -> ToolOutcome {
        let student_id = ctx.student.student_id.clone();
        match ctx
            .store
            .run_blocking(move |store| store.get_profile(student_id.as_str()))
            .await
        {
            Ok(profile) => ToolOutcome::ok(json!({
                "id": profile.id,
                "full_name": profile.full_name,
                "full_name_ar": profile.full_name_ar,
                "display_name": i18n::resolve(
                    ctx.student.language,
                    profile.full_name_ar.as_str(),
                    profile.full_name.as_str(),
                    profile.full_name.as_str(),
                ),
                "grade_level": profile.grade_level,
                "preferred_language": profile.preferred_language,
                "response_language": ctx.student.language.as_str(),
            })),
            Err(error) => store_failure(self.name(), error),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProgressParams {
    #[serde(default)]
    subject_id: Option<String>,
}

pub struct GetStudentProgress;

#[async_trait]
impl TutorTool for GetStudentProgress {
    fn name(&self) -> &'static str {
        "get_student_progress"
    }

    fn description(&self) -> &'static str {
        "Get lesson completion and homework scores per subject for the current student."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject_id": {"type": "string", "description": "Limit the report to one subject"}
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<ProgressParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let student_id = ctx.student.student_id.clone();
        let grade = ctx.student.grade_level;
        let loaded = ctx
            .store
            .run_blocking(move |store| {
                let summary = store.progress_summary(student_id.as_str(), grade)?;
                let recent = store.list_lesson_progress(student_id.as_str())?;
                Ok((summary, recent))
            })
            .await;
        let (summary, recent) = match loaded {
            Ok(v) => v,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let subjects = summary
            .subjects
            .iter()
            .filter(|s| params.subject_id.as_deref().map_or(true, |id| id == s.subject_id))
            .map(|s| subject_json(lang, s))
            .collect::<Vec<_>>();
        let recent_lessons = recent
            .iter()
            .filter(|p| params.subject_id.as_deref().map_or(true, |id| id == p.subject_id))
            .take(10)
            .map(|p| {
                json!({
                    "lesson_id": p.lesson_id,
                    "title_en": p.lesson_title_en,
                    "title_ar": p.lesson_title_ar,
                    "title": i18n::resolve(lang, p.lesson_title_ar.as_str(), p.lesson_title_en.as_str(), ""),
                    "status": p.status,
                    "progress_percent": p.progress_percent,
                    "last_accessed_at": p.last_accessed_at,
                })
            })
            .collect::<Vec<_>>();

        ToolOutcome::ok(json!({
            "lessons_total": summary.lessons_total,
            "lessons_completed": summary.lessons_completed,
            "lessons_in_progress": summary.lessons_in_progress,
            "average_progress": round1(summary.average_progress),
            "homework_pending": summary.homework_pending,
            "homework_graded": summary.homework_graded,
            "homework_average": summary.homework_average.map(round1),
            "last_activity_at": summary.last_activity_at,
            "subjects": subjects,
            "recent_lessons": recent_lessons,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct WeakAreaParams {
    #[serde(default)]
    limit: Option<usize>,
}

pub struct GetWeakAreas;

#[async_trait]
impl TutorTool for GetWeakAreas {
    fn name(&self) -> &'static str {
        "get_weak_areas"
    }

    fn description(&self) -> &'static str {
        "Find the subjects where the student is struggling most, based on progress, grades and mistakes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "minimum": 1, "maximum": 10}
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<WeakAreaParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let limit = params.limit.unwrap_or(3);
        let student_id = ctx.student.student_id.clone();
        let grade = ctx.student.grade_level;
        let loaded = ctx
            .store
            .run_blocking(move |store| {
                let scores = store.subject_scores(student_id.as_str(), grade)?;
                let mistakes = store.list_mistakes(student_id.as_str(), None, 200)?;
                Ok((scores, mistakes))
            })
            .await;
        let (scores, mistakes) = match loaded {
            Ok(v) => v,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let mut active = scores
            .into_iter()
            .filter(has_activity)
            .collect::<Vec<_>>();
        if active.is_empty() {
            return ToolOutcome::ok(json!({
                "weak_areas": [],
                "note": ctx.student.text(
                    "لا يوجد نشاط كافٍ بعد لتحديد نقاط الضعف.",
                    "Not enough activity yet to identify weak areas.",
                ),
            }));
        }
        active.sort_by(|a, b| a.mastery().total_cmp(&b.mastery()));

        let weak_areas = active
            .iter()
            .take(limit)
            .map(|score| {
                let mistake_count = mistakes
                    .iter()
                    .filter(|m| m.subject_id.as_deref() == Some(score.subject_id.as_str()))
                    .count();
                let mut item = subject_json(lang, score);
                item["mastery"] = json!(round1(score.mastery()));
                item["recent_mistakes"] = json!(mistake_count);
                item
            })
            .collect::<Vec<_>>();
        ToolOutcome::ok(json!({ "weak_areas": weak_areas }))
    }
}

pub(crate) fn has_activity(score: &SubjectScore) -> bool {
    score.average_progress > 0.0 || score.graded_count > 0 || score.lessons_completed > 0
}

pub(crate) fn subject_json(lang: i18n::Language, score: &SubjectScore) -> Value {
    let completion = if score.lessons_total > 0 {
        score.lessons_completed as f64 * 100.0 / score.lessons_total as f64
    } else {
        0.0
    };
    json!({
        "subject_id": score.subject_id,
        "name_en": score.name_en,
        "name_ar": score.name_ar,
        "name": i18n::resolve(lang, score.name_ar.as_str(), score.name_en.as_str(), ""),
        "lessons_total": score.lessons_total,
        "lessons_completed": score.lessons_completed,
        "completion_percent": round1(completion),
        "average_progress": round1(score.average_progress),
        "homework_average": score.homework_average.map(round1),
        "graded_homework": score.graded_count,
    })
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
