//! Signup, login, and profile routes.
//!
//! Signup and login are throttled per client IP to slow credential
//! stuffing and bulk account creation. Throttling is checked before any
//! credential work so a flood never reaches the password hasher.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use signals_shared::QuotaWindow;

use crate::accounts;
use crate::auth::{client_ip, hash_password, verify_password, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: uuid::Uuid,
    pub email: String,
    pub is_paid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

pub async fn signup(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    throttle_auth(&state, "signup", &headers, remote).await?;

    if accounts::find_by_email(&state.pool, &body.email)
        .await?
        .is_some()
    {
        return Err(ApiError::EmailTaken);
    }

    let password_hash = hash_password(&body.password)?;
    let account = accounts::create(&state.pool, &body.email, &password_hash).await?;
    tracing::info!(account_id = %account.id, "Account created");

    let token = issue_token(&state, &account)?;
    Ok((StatusCode::CREATED, Json(token)))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CredentialsRequest>,
) -> ApiResult<Json<TokenResponse>> {
    throttle_auth(&state, "login", &headers, remote).await?;

    let account = accounts::find_by_email(&state.pool, &body.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    if !verify_password(&body.password, &account.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    Ok(Json(issue_token(&state, &account)?))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let account = accounts::find_by_id(&state.pool, user.account_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(ProfileResponse {
        id: account.id,
        email: account.email,
        is_paid: account.is_paid,
        created_at: account.created_at,
    }))
}

/// Per-IP fixed-window throttle shared by signup and login (separate
/// counters per purpose).
async fn throttle_auth(
    state: &AppState,
    purpose: &str,
    headers: &HeaderMap,
    remote: SocketAddr,
) -> ApiResult<()> {
    let ip = client_ip(headers, remote);
    let result = state
        .rate_limiter
        .check_and_consume(
            purpose,
            &ip,
            state.config.auth_rate_limit_per_minute,
            QuotaWindow::Minute,
        )
        .await;

    if !result.allowed {
        tracing::warn!(purpose = purpose, ip = %ip, "Auth rate limit hit");
        return Err(ApiError::RateLimited {
            retry_after_seconds: result.retry_after_seconds.unwrap_or(60),
        });
    }
    Ok(())
}

fn issue_token(state: &AppState, account: &accounts::Account) -> ApiResult<TokenResponse> {
    let access_token = state
        .jwt_manager
        .issue_token(account.id, &account.email)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("token issuance failed: {e}")))?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
    })
}
