//! API error taxonomy and HTTP mapping.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use signals_billing::BillingError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Too many requests. Please try again later.")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Daily limit exceeded. Upgrade to paid plan for unlimited signals.")]
    QuotaExceeded,

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    Unauthorized,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid webhook signature")]
    VerificationFailed,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Billing error: {0}")]
    Billing(BillingError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::WebhookSignatureInvalid => ApiError::VerificationFailed,
            BillingError::MalformedPayload(detail) => ApiError::MalformedPayload(detail),
            other => ApiError::Billing(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::QuotaExceeded => StatusCode::FORBIDDEN,
            ApiError::InvalidCredentials | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::EmailTaken
            | ApiError::VerificationFailed
            | ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(_)
            | ApiError::Serialization(_)
            | ApiError::Billing(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail stays in the logs, not in the response body.
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        if let ApiError::RateLimited {
            retry_after_seconds,
        } = &self
        {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let response = ApiError::RateLimited {
            retry_after_seconds: 37,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &header::HeaderValue::from_static("37")
        );
    }

    #[test]
    fn test_quota_exceeded_is_forbidden_with_upgrade_hint() {
        let err = ApiError::QuotaExceeded;
        assert!(err.to_string().contains("Upgrade to paid plan"));
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_billing_signature_failure_maps_to_bad_request() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(err, ApiError::VerificationFailed));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_errors_do_not_leak_detail() {
        let err: ApiError = anyhow::anyhow!("connection refused to 10.0.0.3").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
