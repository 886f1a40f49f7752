//! One tutor turn: identity, session context, planner run, streamed events and
//! the persisted request/response pair.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::learning::{
    CreateConversationInput, LearningRepoError, LearningStore, NewMessageInput, PersistTurnInput,
    ProfileRecord, SharedLearningStore,
};
use crate::i18n::{self, Language};
use crate::tutor::context::StudentContext;
use crate::tutor::planner::{PlanEventSink, PlanRequest, PlanSignal, Planner, ToolBridge};
use crate::tutor::protocol::{
    latest_user_text, to_transcript, ClientMessage, MessageMetadata, StreamEvent,
    TranscriptBuilder,
};
use crate::tutor::tools::ToolExecutor;

const TITLE_CHARS: usize = 50;

pub type TurnStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnLinks {
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub homework_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub messages: Vec<ClientMessage>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub context: TurnLinks,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("student profile not found")]
    UnknownStudent,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error(transparent)]
    Store(#[from] LearningRepoError),
}

struct PreparedTurn {
    student: StudentContext,
    conversation_id: String,
    user_message: NewMessageInput,
    request: PlanRequest,
}

/// Aborts the planner task when the turn stream is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: SharedLearningStore,
    executor: ToolExecutor,
    planner: Arc<dyn Planner>,
}

impl Orchestrator {
    pub fn new(store: SharedLearningStore, executor: ToolExecutor, planner: Arc<dyn Planner>) -> Self {
        Self {
            store,
            executor,
            planner,
        }
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Validates the turn and starts the planner. Errors here happen before any
    /// event is streamed.
    pub async fn start_turn(
        &self,
        student_id: &str,
        request: TurnRequest,
    ) -> Result<TurnStream, TurnError> {
        let prepared = self.prepare(student_id, request).await?;
        info!(
            student_id = %prepared.student.student_id,
            conversation_id = %prepared.conversation_id,
            "tutor turn started"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<PlanSignal>();
        let sink = PlanEventSink::new(tx);
        let bridge = ToolBridge::new(self.executor.clone(), prepared.student.clone(), sink.clone());
        let planner = Arc::clone(&self.planner);
        let plan_request = prepared.request;
        let handle = tokio::spawn(async move {
            let result = planner.plan(plan_request, &bridge, &sink).await;
            sink.finish(result);
        });

        let store = Arc::clone(&self.store);
        let conversation_id = prepared.conversation_id;
        let user_message = prepared.user_message;
        let student = prepared.student;
        let message_id = format!("msg_{}", Uuid::new_v4().simple());

        let stream = async_stream::stream! {
            let _planner = AbortOnDrop(handle);
            let mut transcript = TranscriptBuilder::new();
            yield StreamEvent::Start {
                message_id: message_id.clone(),
                message_metadata: MessageMetadata {
                    conversation_id: conversation_id.clone(),
                },
            };

            let outcome = loop {
                match rx.recv().await {
                    Some(PlanSignal::Event(event)) => {
                        transcript.observe(&event);
                        yield event;
                    }
                    Some(PlanSignal::Done(result)) => break result.map_err(|e| e.to_string()),
                    None => break Err(String::from("planner task ended without a result")),
                }
            };
            if let Err(error) = outcome {
                warn!(
                    student_id = %student.student_id,
                    conversation_id = %conversation_id,
                    error = %error,
                    "tutor turn failed"
                );
                yield StreamEvent::Error { error_text: apology(student.language) };
                return;
            }

            let (text, tool_parts) = transcript.finish();
            let persist = PersistTurnInput {
                conversation_id: conversation_id.clone(),
                user: user_message,
                assistant: NewMessageInput {
                    id: Some(message_id),
                    content: text,
                    tool_parts,
                },
            };
            match store.run_blocking(move |store| store.persist_turn(persist)).await {
                Ok(_) => {
                    yield StreamEvent::Finish {
                        message_metadata: MessageMetadata {
                            conversation_id: conversation_id.clone(),
                        },
                    };
                }
                Err(error) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %error,
                        "failed to persist tutor turn"
                    );
                    yield StreamEvent::Error { error_text: apology(student.language) };
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn prepare(&self, student_id: &str, request: TurnRequest) -> Result<PreparedTurn, TurnError> {
        let Some((_, latest_text)) = latest_user_text(&request.messages) else {
            return Err(TurnError::InvalidRequest(String::from(
                "messages must include a user message with text",
            )));
        };
        let requested_language = match request.language.as_deref() {
            Some(raw) => Some(Language::parse(raw).ok_or_else(|| {
                TurnError::InvalidRequest(format!("Unsupported language '{raw}'"))
            })?),
            None => None,
        };

        let student_id = student_id.to_string();
        let conversation_id = request.conversation_id.clone();
        let links = request.context.clone();
        let title = conversation_title(latest_text.as_str());
        let loaded = self
            .store
            .run_blocking(move |store| {
                let profile = match store.get_profile(student_id.as_str()) {
                    Ok(profile) => profile,
                    Err(LearningRepoError::NotFound) => return Ok(None),
                    Err(e) => return Err(e),
                };
                let conversation = match conversation_id {
                    Some(id) => match store.get_student_conversation(student_id.as_str(), id.as_str()) {
                        Ok(conversation) => Some(conversation),
                        Err(LearningRepoError::NotFound) => None,
                        Err(e) => return Err(e),
                    },
                    None => Some(store.create_conversation(CreateConversationInput {
                        student_id: student_id.clone(),
                        lesson_id: links.lesson_id.clone(),
                        homework_id: links.homework_id.clone(),
                        subject_id: links.subject_id.clone(),
                        title,
                    })?),
                };
                let linked = linked_material(store, student_id.as_str(), &links)?;
                Ok(Some((profile, conversation, linked)))
            })
            .await?;
        let Some((profile, conversation, linked)) = loaded else {
            return Err(TurnError::UnknownStudent);
        };
        let Some(conversation) = conversation else {
            return Err(TurnError::ConversationNotFound);
        };

        let language = requested_language
            .or_else(|| Language::parse(profile.preferred_language.as_str()))
            .unwrap_or_default();
        let student = StudentContext::from_profile(&profile, language)
            .with_conversation(conversation.id.clone())
            .with_last_user_message(latest_text.clone());

        Ok(PreparedTurn {
            request: PlanRequest {
                system_prompt: session_context(&profile, &student, &linked),
                transcript: to_transcript(&request.messages),
                language,
            },
            conversation_id: conversation.id,
            user_message: NewMessageInput {
                id: None,
                content: latest_text,
                tool_parts: Vec::new(),
            },
            student,
        })
    }
}

/// Lesson or homework the turn is linked to, as bilingual pairs.
#[derive(Debug, Default)]
struct LinkedMaterial {
    lesson: Option<(String, String)>,
    homework: Option<((String, String), (String, String))>,
}

fn linked_material(
    store: &LearningStore,
    student_id: &str,
    links: &TurnLinks,
) -> Result<LinkedMaterial, LearningRepoError> {
    let mut linked = LinkedMaterial::default();
    if let Some(lesson_id) = links.lesson_id.as_deref() {
        match store.get_lesson(lesson_id) {
            Ok(lesson) => linked.lesson = Some((lesson.title_ar, lesson.title_en)),
            Err(LearningRepoError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    if let Some(homework_id) = links.homework_id.as_deref() {
        match store.get_homework_detail(student_id, homework_id) {
            Ok(detail) => {
                linked.homework = Some((
                    (detail.entry.title_ar, detail.entry.title_en),
                    (detail.instructions_ar, detail.instructions_en),
                ))
            }
            Err(LearningRepoError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(linked)
}

fn session_context(profile: &ProfileRecord, student: &StudentContext, linked: &LinkedMaterial) -> String {
    let lang = student.language;
    let mut lines = vec![
        String::from(
            "You are a friendly tutor for school students. Use the tools to look up the student's \
             lessons, progress and homework instead of guessing.",
        ),
        format!("Student name: {}", student.display_name()),
        format!(
            "Always respond in {}, even when tool results use another language.",
            lang.display_name()
        ),
    ];
    match profile.grade_level {
        Some(grade) => lines.push(format!("Grade level: {grade}")),
        None => lines.push(String::from("Grade level: unknown")),
    }
    if let Some((ar, en)) = linked.lesson.as_ref() {
        lines.push(format!(
            "The student is studying the lesson \"{}\".",
            i18n::resolve(lang, ar, en, "")
        ));
    }
    if let Some(((title_ar, title_en), (instr_ar, instr_en))) = linked.homework.as_ref() {
        lines.push(format!(
            "The student is working on the homework \"{}\".",
            i18n::resolve(lang, title_ar, title_en, "")
        ));
        let instructions = i18n::resolve(lang, instr_ar, instr_en, "");
        if !instructions.is_empty() {
            lines.push(format!("Homework instructions: {instructions}"));
        }
        lines.push(String::from(
            "Guide the student towards the answers with hints. Do not reveal answers directly.",
        ));
    }
    lines.push(String::from(
        "Homework creation needs the student's agreement: show the preview first and only \
         confirm after the student says yes.",
    ));
    lines.join("\n")
}

pub(crate) fn conversation_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(TITLE_CHARS).collect()
}

fn apology(language: Language) -> String {
    String::from(language.pick(
        "عذرًا، حدث خطأ أثناء معالجة رسالتك. يرجى المحاولة مرة أخرى.",
        "Sorry, something went wrong while answering. Please try again.",
    ))
}
