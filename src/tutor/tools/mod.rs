pub mod create_homework;
pub mod homework;
pub mod insights;
pub mod lessons;
pub mod profile;
pub mod question_gen;
pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::db::learning::{LearningRepoError, SharedLearningStore};
use crate::tutor::context::StudentContext;
use crate::tutor::exec_log::ExecutionLogger;
use crate::tutor::rate_limit::RateLimiter;
use crate::tutor::semantic::LessonSearch;

/// Uniform tool result. Failures reach the planner as `{"error": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure { error: String },
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self::Success(data)
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self::Failure {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_planner_value(self) -> Value {
        match self {
            Self::Success(data) => data,
            Self::Failure { error } => json!({ "error": error }),
        }
    }
}

/// How the executor treats one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPolicy {
    /// Not pre-logged and not rate limited.
    Free,
    /// Logged, not rate limited.
    Logged,
    /// Logged and checked against the rate limiter.
    Metered,
}

pub struct ToolContext<'a> {
    pub student: &'a StudentContext,
    pub store: &'a SharedLearningStore,
    pub search: &'a LessonSearch,
}

#[async_trait]
pub trait TutorTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn parameters_schema(&self) -> Value;

    fn call_policy(&self, _student: &StudentContext, _params: &Value) -> CallPolicy {
        CallPolicy::Logged
    }

    /// Name recorded in the execution log for this call.
    fn log_name(&self, _student: &StudentContext, _params: &Value) -> String {
        self.name().to_string()
    }

    async fn execute(&self, ctx: &ToolContext<'_>, params: Value) -> ToolOutcome;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default)]
pub struct ToolCatalog {
    tools: HashMap<&'static str, Arc<dyn TutorTool>>,
    order: Vec<&'static str>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tutor tool, in the order they are advertised to the planner.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(profile::GetStudentProfile));
        catalog.register(Arc::new(profile::GetStudentProgress));
        catalog.register(Arc::new(profile::GetWeakAreas));
        catalog.register(Arc::new(lessons::GetAvailableLessons));
        catalog.register(Arc::new(lessons::GetLessonDetails));
        catalog.register(Arc::new(lessons::GetLessonContentChunk));
        catalog.register(Arc::new(lessons::GetLessonContext));
        catalog.register(Arc::new(lessons::SearchLessons));
        catalog.register(Arc::new(lessons::SuggestLearningPath));
        catalog.register(Arc::new(homework::GetStudentHomework));
        catalog.register(Arc::new(homework::GetHomeworkDetails));
        catalog.register(Arc::new(homework::GetMistakePatterns));
        catalog.register(Arc::new(insights::GetLearningInsights));
        catalog.register(Arc::new(create_homework::CreateHomeworkAssignment));
        catalog
    }

    pub fn register(&mut self, tool: Arc<dyn TutorTool>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_some() {
            warn!(tool = name, "tool registered twice; keeping the latest");
        } else {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TutorTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

/// Validates, rate limits, logs and runs catalog tools for one student.
#[derive(Clone)]
pub struct ToolExecutor {
    catalog: Arc<ToolCatalog>,
    store: SharedLearningStore,
    search: Arc<LessonSearch>,
    limiter: RateLimiter,
    logger: ExecutionLogger,
}

impl ToolExecutor {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        store: SharedLearningStore,
        search: Arc<LessonSearch>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(Arc::clone(&store)),
            logger: ExecutionLogger::new(Arc::clone(&store)),
            catalog,
            store,
            search,
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        self.catalog.as_ref()
    }

    pub async fn execute(&self, student: &StudentContext, name: &str, input: Value) -> ToolOutcome {
        let Some(tool) = self.catalog.get(name) else {
            return ToolOutcome::err(format!(
                "Unknown tool '{name}'. Available tools: {}",
                self.catalog.names().join(", ")
            ));
        };
        let params = match schema::validate_and_coerce(&tool.parameters_schema(), input) {
            Ok(params) => params,
            Err(message) => return ToolOutcome::err(message),
        };

        let policy = tool.call_policy(student, &params);
        let log_name = tool.log_name(student, &params);
        if policy == CallPolicy::Metered {
            let decision = self
                .limiter
                .check(student.student_id.as_str(), log_name.as_str())
                .await;
            if !decision.allowed {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| String::from("Rate limit exceeded"));
                info!(
                    student_id = %student.student_id,
                    tool = %log_name,
                    "tool call rate limited"
                );
                self.logger
                    .log_rate_limited(student, log_name.as_str(), &params, reason.as_str())
                    .await;
                return ToolOutcome::err(reason);
            }
        }

        let log_id = if policy == CallPolicy::Free {
            None
        } else {
            self.logger.log_start(student, log_name.as_str(), &params).await
        };

        let ctx = ToolContext {
            student,
            store: &self.store,
            search: self.search.as_ref(),
        };
        let outcome = tool.execute(&ctx, params).await;

        if let Some(log_id) = log_id {
            self.logger.log_complete(log_id.as_str(), &outcome).await;
        }
        outcome
    }
}

pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ToolOutcome> {
    serde_json::from_value(params).map_err(|e| ToolOutcome::err(format!("Invalid parameters: {e}")))
}

/// Maps store errors onto planner-safe messages.
pub(crate) fn store_failure(tool: &str, error: LearningRepoError) -> ToolOutcome {
    match error {
        LearningRepoError::NotFound => ToolOutcome::err("Record not found"),
        LearningRepoError::Validation(message) => ToolOutcome::err(message),
        other => {
            warn!(tool, error = %other, "tool store query failed");
            ToolOutcome::err("The learning records are unavailable right now. Please try again.")
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::db::learning::{
        ContentBlockInput, SharedLearningStore, UpsertLessonInput, UpsertProfileInput,
        UpsertSubjectInput,
    };
    use crate::i18n::Language;
    use crate::tutor::context::StudentContext;
    use crate::tutor::semantic::LessonSearch;

    use super::*;

    pub struct Fixture {
        pub store: SharedLearningStore,
        pub search: LessonSearch,
        pub student: StudentContext,
        pub math_id: String,
        pub science_id: String,
        pub addition_id: String,
        pub plants_id: String,
    }

    impl Fixture {
        pub fn ctx(&self) -> ToolContext<'_> {
            ToolContext {
                student: &self.student,
                store: &self.store,
                search: &self.search,
            }
        }

        pub fn ctx_for<'a>(&'a self, student: &'a StudentContext) -> ToolContext<'a> {
            ToolContext {
                student,
                store: &self.store,
                search: &self.search,
            }
        }

        pub fn executor(&self) -> ToolExecutor {
            ToolExecutor::new(
                Arc::new(ToolCatalog::standard()),
                Arc::clone(&self.store),
                Arc::new(LessonSearch::keyword_only(Arc::clone(&self.store))),
            )
        }
    }

    pub fn fixture(language: Language) -> Fixture {
        let store = crate::db::learning::test_support::temp_store();
        let profile = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("Sara Ahmed"),
                full_name_ar: Some(String::from("سارة أحمد")),
                grade_level: Some(3),
                preferred_language: Some(language.as_str().to_string()),
                ..UpsertProfileInput::default()
            })
            .expect("profile");
        let math = store
            .upsert_subject(UpsertSubjectInput {
                slug: String::from("math"),
                name_en: String::from("Mathematics"),
                name_ar: String::from("الرياضيات"),
                ..UpsertSubjectInput::default()
            })
            .expect("math");
        let science = store
            .upsert_subject(UpsertSubjectInput {
                slug: String::from("science"),
                name_en: String::from("Science"),
                name_ar: String::from("العلوم"),
                ..UpsertSubjectInput::default()
            })
            .expect("science");
        let addition = store
            .upsert_lesson(UpsertLessonInput {
                subject_id: math.id.clone(),
                title_en: String::from("Addition within 100"),
                title_ar: String::from("الجمع ضمن ١٠٠"),
                description_en: Some(String::from("Adding two-digit numbers")),
                description_ar: Some(String::from("جمع الأعداد المكونة من رقمين")),
                grade_level: Some(3),
                sort_order: Some(1),
                ..UpsertLessonInput::default()
            })
            .expect("addition");
        store
            .append_content_block(ContentBlockInput {
                lesson_id: addition.id.clone(),
                body_en: String::from("To add 23 and 45, add the tens and then the ones."),
                body_ar: String::from("لجمع ٢٣ و٤٥ نجمع العشرات ثم الآحاد."),
            })
            .expect("block");
        let plants = store
            .upsert_lesson(UpsertLessonInput {
                subject_id: science.id.clone(),
                title_en: String::from("How plants grow"),
                title_ar: String::from("كيف تنمو النباتات"),
                description_en: Some(String::from("Seeds, water and sunlight")),
                grade_level: Some(3),
                sort_order: Some(1),
                ..UpsertLessonInput::default()
            })
            .expect("plants");

        Fixture {
            search: LessonSearch::keyword_only(Arc::clone(&store)),
            student: StudentContext::from_profile(&profile, language),
            math_id: math.id,
            science_id: science.id,
            addition_id: addition.id,
            plants_id: plants.id,
            store,
        }
    }
}
