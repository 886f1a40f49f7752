use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::api::error::ErrorKind;
use crate::db::learning::LearningRepoError;
use crate::tutor::TurnError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

/// What a 404 was looking for. Conversations owned by another student are
/// reported exactly like missing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Conversation,
    Student,
    Record,
}

impl Resource {
    fn code(self) -> &'static str {
        match self {
            Self::Conversation => "conversation_not_found",
            Self::Student => "student_not_found",
            Self::Record => "not_found",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Conversation => "Conversation not found",
            Self::Student => "Student profile not found",
            Self::Record => "Record not found",
        }
    }
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: Some(kind),
            error_code: Some(code.into()),
        }),
    )
}

pub fn not_found(resource: Resource) -> ApiObject<Value> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        resource.code(),
        resource.message(),
    )
}

pub fn invalid_request(message: impl Into<String>) -> ApiObject<Value> {
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "invalid_request",
        message,
    )
}

pub fn map_repo_error(error: LearningRepoError, missing: Resource) -> ApiObject<Value> {
    match error {
        LearningRepoError::NotFound => not_found(missing),
        LearningRepoError::Validation(message) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "validation_error",
            message,
        ),
        LearningRepoError::Internal(message) => internal_error(message),
        LearningRepoError::Sqlite(source) => internal_error(format!("database error: {source}")),
    }
}

/// Rejections raised before a turn starts streaming.
pub fn map_turn_error(error: TurnError) -> ApiObject<Value> {
    match error {
        TurnError::InvalidRequest(message) => invalid_request(message),
        TurnError::UnknownStudent => not_found(Resource::Student),
        TurnError::ConversationNotFound => not_found(Resource::Conversation),
        TurnError::Store(error) => map_repo_error(error, Resource::Record),
    }
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or_else(|e| {
        error!(error = %e, "api payload failed to serialize");
        json!({"ok": false, "error": "Internal server error"})
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_conversations_get_their_own_code() {
        let (status, payload) = map_repo_error(LearningRepoError::NotFound, Resource::Conversation);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload.0["ok"], json!(false));
        assert_eq!(payload.0["error"], json!("Conversation not found"));
        assert_eq!(payload.0["error_kind"], json!("validation"));
        assert_eq!(payload.0["error_code"], json!("conversation_not_found"));
    }

    #[test]
    fn turn_rejections_map_to_client_statuses() {
        let (status, body) = map_turn_error(TurnError::InvalidRequest(String::from(
            "messages must include a user message with text",
        )));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["error_code"], json!("invalid_request"));

        let (status, body) = map_turn_error(TurnError::UnknownStudent);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0["error_code"], json!("student_not_found"));

        let (status, body) = map_turn_error(TurnError::Store(LearningRepoError::Sqlite(
            rusqlite::Error::InvalidQuery,
        )));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.0["error"], json!("Internal server error"));
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let (status, payload) = internal_error("no such table: messages");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload.0["error"], json!("Internal server error"));
        assert_eq!(payload.0["error_kind"], json!("infra"));
    }
}
