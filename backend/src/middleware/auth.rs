//! Authentication middleware
//!
//! Validates the bearer token and stores the caller's [`Session`] in the
//! request extensions for the [`CurrentUser`] extractor.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use shared::types::Session;

use crate::error::{ErrorCategory, ErrorResponse};
use crate::AppState;

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token.trim(),
        None => return unauthorized_response("Missing or invalid Authorization header"),
    };

    let session = match state.auth.session_from_token(token) {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!("Rejected token: {}", err);
            return unauthorized_response(&err.to_string());
        }
    };

    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Create unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(ErrorCategory::Authentication, message)),
    )
        .into_response()
}

/// Extractor for the authenticated caller
#[derive(Clone, Debug)]
pub struct CurrentUser(pub Session);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse::new(
                        ErrorCategory::Authentication,
                        "Authentication required",
                    )),
                )
            })
    }
}
