use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::learning::{LessonContentSource, LessonRecord};
use crate::i18n::{self, Language};
use crate::tutor::context::StudentContext;
use crate::tutor::tools::profile::has_activity;
use crate::tutor::tools::{
    parse_params, store_failure, CallPolicy, ToolContext, ToolOutcome, TutorTool,
};

pub const DEFAULT_CHUNK_CHARS: usize = 1200;
pub const MIN_CHUNK_CHARS: usize = 200;
pub const MAX_CHUNK_CHARS: usize = 2000;

pub(crate) fn lesson_json(lang: Language, lesson: &LessonRecord) -> Value {
    json!({
        "lesson_id": lesson.id,
        "subject_id": lesson.subject_id,
        "title_en": lesson.title_en,
        "title_ar": lesson.title_ar,
        "title": i18n::resolve(lang, lesson.title_ar.as_str(), lesson.title_en.as_str(), ""),
        "subject_name": i18n::resolve(
            lang,
            lesson.subject_name_ar.as_str(),
            lesson.subject_name_en.as_str(),
            "",
        ),
        "description_en": lesson.description_en,
        "description_ar": lesson.description_ar,
        "description": i18n::resolve(
            lang,
            lesson.description_ar.as_str(),
            lesson.description_en.as_str(),
            "",
        ),
        "grade_level": lesson.grade_level,
        "duration_minutes": lesson.duration_minutes,
    })
}

/// Full lesson text in the student's language: content blocks, or the description.
pub(crate) fn assemble_content(lang: Language, source: &LessonContentSource) -> String {
    let blocks = source
        .blocks
        .iter()
        .map(|(en, ar)| i18n::resolve(lang, ar.as_str(), en.as_str(), ""))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();
    if blocks.is_empty() {
        i18n::resolve(
            lang,
            source.lesson.description_ar.as_str(),
            source.lesson.description_en.as_str(),
            "",
        )
    } else {
        blocks.join("\n\n")
    }
}

#[derive(Debug, Deserialize)]
struct AvailableLessonsParams {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct GetAvailableLessons;

#[async_trait]
impl TutorTool for GetAvailableLessons {
    fn name(&self) -> &'static str {
        "get_available_lessons"
    }

    fn description(&self) -> &'static str {
        "List published lessons for the student's grade, optionally for one subject, with the student's progress on each."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject_id": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50}
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<AvailableLessonsParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let student_id = ctx.student.student_id.clone();
        let grade = ctx.student.grade_level;
        let limit = params.limit.unwrap_or(20);
        let loaded = ctx
            .store
            .run_blocking(move |store| {
                let lessons = store.list_lessons(params.subject_id.as_deref(), grade, limit)?;
                let progress = store.list_lesson_progress(student_id.as_str())?;
                Ok((lessons, progress))
            })
            .await;
        let (lessons, progress) = match loaded {
            Ok(v) => v,
            Err(error) => return store_failure(self.name(), error),
        };

        let by_lesson = progress
            .iter()
            .map(|p| (p.lesson_id.as_str(), p))
            .collect::<HashMap<_, _>>();
        let lang = ctx.student.language;
        let items = lessons
            .iter()
            .map(|lesson| {
                let mut item = lesson_json(lang, lesson);
                let (status, percent) = by_lesson
                    .get(lesson.id.as_str())
                    .map(|p| (p.status.as_str(), p.progress_percent))
                    .unwrap_or(("not_started", 0));
                item["status"] = json!(status);
                item["progress_percent"] = json!(percent);
                item
            })
            .collect::<Vec<_>>();
        ToolOutcome::ok(json!({ "count": items.len(), "lessons": items }))
    }
}

#[derive(Debug, Deserialize)]
struct LessonIdParams {
    lesson_id: String,
}

pub struct GetLessonDetails;

#[async_trait]
impl TutorTool for GetLessonDetails {
    fn name(&self) -> &'static str {
        "get_lesson_details"
    }

    fn description(&self) -> &'static str {
        "Get one lesson's title, description, subject and the student's progress on it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lesson_id": {"type": "string", "minLength": 1}
            },
            "required": ["lesson_id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<LessonIdParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let student_id = ctx.student.student_id.clone();
        let loaded = ctx
            .store
            .run_blocking(move |store| {
                let source = store.lesson_content_source(params.lesson_id.as_str())?;
                let progress = store
                    .list_lesson_progress(student_id.as_str())?
                    .into_iter()
                    .find(|p| p.lesson_id == source.lesson.id);
                Ok((source, progress))
            })
            .await;
        let (source, progress) = match loaded {
            Ok(v) => v,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let mut out = lesson_json(lang, &source.lesson);
        out["content_blocks"] = json!(source.blocks.len());
        out["content_length"] = json!(assemble_content(lang, &source).chars().count());
        out["status"] = json!(progress
            .as_ref()
            .map(|p| p.status.as_str())
            .unwrap_or("not_started"));
        out["progress_percent"] = json!(progress.as_ref().map(|p| p.progress_percent).unwrap_or(0));
        ToolOutcome::ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct ContentChunkParams {
    lesson_id: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<i64>,
}

/// Pages through the assembled lesson text. Offsets count characters.
pub struct GetLessonContentChunk;

#[async_trait]
impl TutorTool for GetLessonContentChunk {
    fn name(&self) -> &'static str {
        "get_lesson_content_chunk"
    }

    fn description(&self) -> &'static str {
        "Read a lesson's content a piece at a time. Start at offset 0 and pass nextOffset until isLast is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lesson_id": {"type": "string", "minLength": 1},
                "offset": {"type": "integer", "minimum": 0},
                "limit": {"type": "integer", "description": "Characters to return; clamped to 200..2000"}
            },
            "required": ["lesson_id"]
        })
    }

    fn call_policy(&self, _student: &StudentContext, _params: &Value) -> CallPolicy {
        CallPolicy::Free
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<ContentChunkParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let lesson_id = params.lesson_id.clone();
        let source = match ctx
            .store
            .run_blocking(move |store| store.lesson_content_source(lesson_id.as_str()))
            .await
        {
            Ok(source) => source,
            Err(error) => return store_failure(self.name(), error),
        };

        let content = assemble_content(ctx.student.language, &source);
        let offset = params.offset.unwrap_or(0);
        let limit = params.limit.map_or(DEFAULT_CHUNK_CHARS, |requested| {
            usize::try_from(requested)
                .unwrap_or(0)
                .clamp(MIN_CHUNK_CHARS, MAX_CHUNK_CHARS)
        });
        let page = content_window(content.as_str(), offset, limit);
        ToolOutcome::ok(json!({
            "lesson_id": source.lesson.id,
            "content": page.content,
            "offset": offset,
            "nextOffset": page.next_offset,
            "isLast": page.is_last,
            "totalLength": page.total_length,
        }))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ContentWindow {
    pub content: String,
    pub next_offset: usize,
    pub is_last: bool,
    pub total_length: usize,
}

pub(crate) fn content_window(content: &str, offset: usize, limit: usize) -> ContentWindow {
    let total_length = content.chars().count();
    let start = offset.min(total_length);
    let end = start.saturating_add(limit).min(total_length);
    ContentWindow {
        content: content.chars().skip(start).take(end - start).collect(),
        next_offset: end,
        is_last: end >= total_length,
        total_length,
    }
}

#[derive(Debug, Deserialize)]
struct LessonContextParams {
    question: String,
    #[serde(default)]
    lesson_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct GetLessonContext;

#[async_trait]
impl TutorTool for GetLessonContext {
    fn name(&self) -> &'static str {
        "get_lesson_context"
    }

    fn description(&self) -> &'static str {
        "Find the lesson passages most relevant to a student's question, optionally inside one lesson."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "minLength": 1},
                "lesson_id": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 5}
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<LessonContextParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let result = match ctx
            .search
            .passages(
                params.question.as_str(),
                params.lesson_id.as_deref(),
                params.limit.unwrap_or(3),
            )
            .await
        {
            Ok(result) => result,
            Err(error) => return store_failure(self.name(), error),
        };

        let passages = result
            .passages
            .iter()
            .map(|p| {
                json!({
                    "lesson_id": p.lesson_id,
                    "content": p.content,
                    "score": (p.score * 1000.0).round() / 1000.0,
                })
            })
            .collect::<Vec<_>>();
        let mut out = json!({
            "match_type": result.match_type,
            "passages": passages,
        });
        if result.passages.is_empty() {
            out["note"] = json!(ctx.student.text(
                "لم يتم العثور على محتوى مرتبط بالسؤال.",
                "No lesson content matched this question.",
            ));
        }
        ToolOutcome::ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct SearchLessons;

#[async_trait]
impl TutorTool for SearchLessons {
    fn name(&self) -> &'static str {
        "search_lessons"
    }

    fn description(&self) -> &'static str {
        "Search lessons by topic in Arabic or English."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 20}
            },
            "required": ["query"]
        })
    }

    fn call_policy(&self, _student: &StudentContext, _params: &Value) -> CallPolicy {
        CallPolicy::Metered
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<SearchParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let result = match ctx
            .search
            .lessons(
                params.query.as_str(),
                ctx.student.grade_level,
                params.limit.unwrap_or(5),
            )
            .await
        {
            Ok(result) => result,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let lessons = result
            .lessons
            .iter()
            .map(|hit| {
                let mut item = lesson_json(lang, &hit.lesson);
                item["score"] = json!(hit.score);
                item
            })
            .collect::<Vec<_>>();
        ToolOutcome::ok(json!({
            "query": params.query,
            "match_type": result.match_type,
            "count": lessons.len(),
            "lessons": lessons,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct LearningPathParams {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Next lessons to study, weakest subjects first.
pub struct SuggestLearningPath;

#[async_trait]
impl TutorTool for SuggestLearningPath {
    fn name(&self) -> &'static str {
        "suggest_learning_path"
    }

    fn description(&self) -> &'static str {
        "Suggest the next lessons the student should study, starting with the subjects that need the most work."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject_id": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 10}
            }
        })
    }

    fn call_policy(&self, _student: &StudentContext, _params: &Value) -> CallPolicy {
        CallPolicy::Metered
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome {
        let params = match parse_params::<LearningPathParams>(params) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        };
        let limit = params.limit.unwrap_or(5);
        let student_id = ctx.student.student_id.clone();
        let grade = ctx.student.grade_level;
        let subject_filter = params.subject_id.clone();
        let loaded = ctx
            .store
            .run_blocking(move |store| {
                let scores = store.subject_scores(student_id.as_str(), grade)?;
                let lessons = store.list_lessons(subject_filter.as_deref(), grade, 500)?;
                let progress = store.list_lesson_progress(student_id.as_str())?;
                Ok((scores, lessons, progress))
            })
            .await;
        let (mut scores, lessons, progress) = match loaded {
            Ok(v) => v,
            Err(error) => return store_failure(self.name(), error),
        };

        // Untouched subjects rank after struggling ones but before strong ones.
        scores.sort_by(|a, b| path_rank(a).total_cmp(&path_rank(b)));
        let subject_rank = scores
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.subject_id.as_str(), idx))
            .collect::<HashMap<_, _>>();
        let by_lesson = progress
            .iter()
            .map(|p| (p.lesson_id.as_str(), p))
            .collect::<HashMap<_, _>>();

        let mut pending = lessons
            .iter()
            .filter(|lesson| {
                by_lesson
                    .get(lesson.id.as_str())
                    .map_or(true, |p| p.status != "completed")
            })
            .collect::<Vec<_>>();
        // In-progress lessons come before new ones within a subject.
        pending.sort_by_key(|lesson| {
            let started = by_lesson.contains_key(lesson.id.as_str());
            (
                subject_rank
                    .get(lesson.subject_id.as_str())
                    .copied()
                    .unwrap_or(usize::MAX),
                !started,
                lesson.sort_order,
            )
        });

        let lang = ctx.student.language;
        let path = pending
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, lesson)| {
                let mut item = lesson_json(lang, lesson);
                let progress = by_lesson.get(lesson.id.as_str());
                item["step"] = json!(idx + 1);
                item["status"] = json!(progress.map(|p| p.status.as_str()).unwrap_or("not_started"));
                item["progress_percent"] = json!(progress.map(|p| p.progress_percent).unwrap_or(0));
                item
            })
            .collect::<Vec<_>>();

        if path.is_empty() {
            return ToolOutcome::ok(json!({
                "path": [],
                "note": ctx.student.text(
                    "أحسنت! لقد أكملت جميع الدروس المتاحة.",
                    "Well done! All available lessons are completed.",
                ),
            }));
        }
        ToolOutcome::ok(json!({ "path": path }))
    }
}

fn path_rank(score: &crate::db::learning::SubjectScore) -> f64 {
    if has_activity(score) {
        score.mastery()
    } else {
        50.0
    }
}
