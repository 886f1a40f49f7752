use std::fmt;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::api::routes::access_for_path;
use crate::api::server::AppState;
use crate::contract::RouteAccess;

/// Student resolved from the request credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentPrincipal {
    DevBypass { student_id: String },
    AccessToken { student_id: String },
}

impl StudentPrincipal {
    pub fn student_id(&self) -> &str {
        match self {
            Self::DevBypass { student_id } | Self::AccessToken { student_id } => {
                student_id.as_str()
            }
        }
    }
}

impl fmt::Display for StudentPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DevBypass { student_id } => write!(f, "dev_bypass:{student_id}"),
            Self::AccessToken { student_id } => write!(f, "access_token:{student_id}"),
        }
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if access_for_path(request.uri().path()) == RouteAccess::Public {
        return next.run(request).await;
    }

    if let Some(student_id) = state.dev_student_id.clone() {
        request
            .extensions_mut()
            .insert(StudentPrincipal::DevBypass { student_id });
        return next.run(request).await;
    }

    let Some(bearer) = extract_bearer_token(&request) else {
        return unauthorized("Missing Authorization: Bearer token");
    };

    let result = state
        .store
        .run_blocking(move |store| store.validate_access_token(bearer.as_str()))
        .await;
    match result {
        Ok(Some(student_id)) => {
            request
                .extensions_mut()
                .insert(StudentPrincipal::AccessToken { student_id });
            next.run(request).await
        }
        Ok(None) => unauthorized("Invalid or revoked token"),
        Err(error) => {
            warn!(error = %error, "access token validation failed");
            unauthorized("Token validation failed")
        }
    }
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    let header_value = request.headers().get(header::AUTHORIZATION)?;
    let value = header_value.to_str().ok()?.trim();
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next()?.trim();
    let token = parts.next()?.trim();
    if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "ok": false,
            "error": message,
            "error_kind": "auth",
            "error_code": "unauthorized",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;

    use super::*;

    fn request_with_auth(value: &str) -> Request<Body> {
        Request::builder()
            .uri("/tutor")
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())
            .expect("request")
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(
            extract_bearer_token(&request_with_auth("bearer abc123")).as_deref(),
            Some("abc123")
        );
        assert!(extract_bearer_token(&request_with_auth("Basic abc123")).is_none());
        assert!(extract_bearer_token(&request_with_auth("Bearer   ")).is_none());
    }

    #[test]
    fn principal_exposes_student_id() {
        let principal = StudentPrincipal::AccessToken {
            student_id: String::from("s1"),
        };
        assert_eq!(principal.student_id(), "s1");
        assert_eq!(principal.to_string(), "access_token:s1");
    }
}
