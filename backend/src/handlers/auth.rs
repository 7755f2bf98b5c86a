//! Authentication and account handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use shared::models::{NewUser, User};
use shared::types::Role;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::auth::AuthTokens;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    pub username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: Role,
}

/// Login endpoint handler
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthTokens>> {
    body.validate()?;
    let tokens = state.auth.login(&body.username, &body.password).await?;
    Ok(Json(tokens))
}

/// Create an operator account (admin only)
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    body.validate()?;
    let user = state
        .auth
        .create_user(
            &session,
            NewUser {
                username: body.username,
                password: body.password,
                role: body.role,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}
