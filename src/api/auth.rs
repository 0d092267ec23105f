//! Authentication endpoints

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{error::AppResult, AppState};

use super::AuthenticatedUser;

/// Login request body
#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Email of the account
    pub username: String,
    pub password: String,
}

/// Issued token
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub expire: DateTime<Utc>,
}

/// Authenticate and get a JWT token
#[utoipa::path(
    post,
    path = "/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let (token, expire) = state
        .services
        .auth
        .login(&request.username, &request.password)
        .await?;

    Ok(Json(TokenResponse { token, expire }))
}

/// Exchange a valid token for a fresh one
#[utoipa::path(
    get,
    path = "/refresh_token",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Token invalid or past the refresh window", body = crate::error::ErrorResponse)
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<TokenResponse>> {
    let (token, expire) = state.services.auth.refresh(&claims).await?;
    Ok(Json(TokenResponse { token, expire }))
}
