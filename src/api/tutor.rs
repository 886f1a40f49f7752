use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::auth::StudentPrincipal;
use crate::api::server::AppState;
use crate::db::learning::{ConversationRecord, MessageRecord};
use crate::tutor::tools::ToolDefinition;
use crate::tutor::TurnRequest;

use super::handler_utils::{into_json, map_repo_error, map_turn_error, ApiObject, Resource};

const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ConversationListResponse {
    ok: bool,
    count: usize,
    conversations: Vec<ConversationRecord>,
}

#[derive(Debug, Clone, Serialize)]
struct ConversationMessagesResponse {
    ok: bool,
    conversation: ConversationRecord,
    count: usize,
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolListResponse {
    ok: bool,
    count: usize,
    tools: Vec<ToolDefinition>,
}

/// Streams one tutor turn as server-sent events. Validation errors are plain
/// JSON responses sent before the stream opens.
pub async fn submit_turn_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<StudentPrincipal>,
    Json(payload): Json<TurnRequest>,
) -> Response {
    debug!(principal = %principal, messages = payload.messages.len(), "tutor turn requested");
    let events = match state
        .orchestrator
        .start_turn(principal.student_id(), payload)
        .await
    {
        Ok(events) => events,
        Err(error) => return map_turn_error(error).into_response(),
    };

    let frames = events
        .map(|event| Ok::<Event, Infallible>(Event::default().data(event.to_json())))
        .chain(stream::once(async {
            Ok::<Event, Infallible>(Event::default().data("[DONE]"))
        }));
    let mut response = Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        HeaderName::from_static(STREAM_PROTOCOL_HEADER),
        HeaderValue::from_static("v1"),
    );
    response
}

pub async fn history_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<StudentPrincipal>,
    Query(query): Query<HistoryQuery>,
) -> ApiObject<Value> {
    let student_id = principal.student_id().to_string();
    let conversation_id = query
        .conversation_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match conversation_id {
        Some(conversation_id) => {
            let result = state
                .store
                .run_blocking(move |store| {
                    let conversation = store
                        .get_student_conversation(student_id.as_str(), conversation_id.as_str())?;
                    let messages = store.list_messages(conversation.id.as_str())?;
                    Ok((conversation, messages))
                })
                .await;
            match result {
                Ok((conversation, messages)) => (
                    StatusCode::OK,
                    into_json(ConversationMessagesResponse {
                        ok: true,
                        conversation,
                        count: messages.len(),
                        messages,
                    }),
                ),
                Err(error) => map_repo_error(error, Resource::Conversation),
            }
        }
        None => {
            let limit = state.history_page_size;
            let result = state
                .store
                .run_blocking(move |store| store.list_conversations(student_id.as_str(), limit))
                .await;
            match result {
                Ok(conversations) => (
                    StatusCode::OK,
                    into_json(ConversationListResponse {
                        ok: true,
                        count: conversations.len(),
                        conversations,
                    }),
                ),
                Err(error) => map_repo_error(error, Resource::Conversation),
            }
        }
    }
}

pub async fn list_tools_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let tools = state.orchestrator.executor().catalog().definitions();
    (
        StatusCode::OK,
        into_json(ToolListResponse {
            ok: true,
            count: tools.len(),
            tools,
        }),
    )
}
