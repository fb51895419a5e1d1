//! Signal delivery with free-tier quota enforcement.
//!
//! Quota order matters: the daily quota is checked (and consumed) before
//! the cache is touched, so a denied request does cost nothing and a
//! cache hit still counts against the free tier. Truncation for free
//! accounts happens after retrieval, so one cached batch serves both
//! tiers.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Serialize;

use signals_shared::QuotaWindow;

use crate::accounts;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::signals::{generate_signals, Signal};
use crate::state::AppState;

/// Quota purpose for the free-tier daily signal limit.
const SIGNAL_QUOTA_PURPOSE: &str = "signal-request";

#[derive(Debug, Serialize)]
pub struct SignalsResponse {
    pub signals: Vec<Signal>,
    pub is_paid: bool,
    /// Set for free accounts: human-readable description of the cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_limit: Option<String>,
    /// Set for free accounts: requests left in today's window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct QuotaCheckResponse {
    pub is_paid: bool,
    /// Absent for paid accounts, which are uncapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

pub async fn get_signals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<SignalsResponse>> {
    // Tier is read fresh per request so an upgrade applies immediately.
    let account = accounts::find_by_id(&state.pool, user.account_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let limit = state.config.free_daily_signal_limit;
    let mut remaining = None;
    if !account.is_paid {
        let result = state
            .rate_limiter
            .check_and_consume(
                SIGNAL_QUOTA_PURPOSE,
                &account.id.to_string(),
                limit,
                QuotaWindow::Day,
            )
            .await;
        if !result.allowed {
            tracing::info!(account_id = %account.id, "Daily signal quota exhausted");
            return Err(ApiError::QuotaExceeded);
        }
        remaining = Some(result.remaining);
    }

    let day_key = QuotaWindow::Day.current_id();
    let mut signals = state
        .signal_cache
        .get_or_compute(&day_key, generate_signals)
        .await?;

    let user_limit = if account.is_paid {
        None
    } else {
        signals.truncate(limit as usize);
        Some(format!("{limit} signals/day (free tier)"))
    };

    Ok(Json(SignalsResponse {
        signals,
        is_paid: account.is_paid,
        user_limit,
        remaining,
    }))
}

/// Non-consuming quota peek: reports today's usage without spending a
/// request.
pub async fn check_quota(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<QuotaCheckResponse>> {
    let account = accounts::find_by_id(&state.pool, user.account_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if account.is_paid {
        return Ok(Json(QuotaCheckResponse {
            is_paid: true,
            limit: None,
            used: 0,
            remaining: None,
        }));
    }

    let limit = state.config.free_daily_signal_limit;
    let used = state
        .rate_limiter
        .current_count(
            SIGNAL_QUOTA_PURPOSE,
            &account.id.to_string(),
            QuotaWindow::Day,
        )
        .await;

    Ok(Json(QuotaCheckResponse {
        is_paid: false,
        limit: Some(limit),
        used,
        remaining: Some(limit.saturating_sub(used)),
    }))
}
