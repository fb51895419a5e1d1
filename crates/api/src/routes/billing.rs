//! Checkout initiation, billing status, and the payment-provider webhook.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use signals_billing::WebhookOutcome;

use crate::accounts;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct BillingStatusResponse {
    pub is_paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub event_type: String,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let customer_ref = match state.ledger.customer_ref(user.account_id).await? {
        Some(existing) => existing,
        None => {
            let created = state
                .payment
                .create_customer(&user.email, user.account_id)
                .await?;
            if state
                .ledger
                .set_customer_ref(user.account_id, &created)
                .await?
            {
                created
            } else {
                // A concurrent checkout won the assignment; use the
                // stored reference so both sessions bill one customer.
                state
                    .ledger
                    .customer_ref(user.account_id)
                    .await?
                    .unwrap_or(created)
            }
        }
    };

    let success_url = body
        .success_url
        .unwrap_or_else(|| format!("{}/dashboard?success=true", state.config.frontend_url));
    let cancel_url = body
        .cancel_url
        .unwrap_or_else(|| format!("{}/dashboard?canceled=true", state.config.frontend_url));

    let session = state
        .payment
        .create_checkout_session(&customer_ref, &success_url, &cancel_url)
        .await?;

    Ok(Json(CheckoutResponse {
        checkout_url: session.checkout_url,
        session_id: session.session_id,
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<BillingStatusResponse>> {
    let account = accounts::find_by_id(&state.pool, user.account_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(BillingStatusResponse {
        is_paid: account.is_paid,
        stripe_customer_id: account.stripe_customer_id,
    }))
}

/// Provider webhook endpoint. The body must stay raw (a `String`, not
/// `Json`) because the signature covers the exact bytes delivered.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::VerificationFailed)?;

    let event = state.payment.verify_and_parse(&body, signature)?;
    let event_type = event.kind.as_str().to_string();

    let outcome = state.webhook_processor().process(event).await?;
    let status = match outcome {
        WebhookOutcome::Processed => "success",
        WebhookOutcome::SkippedDuplicate => "already_processed",
    };

    Ok(Json(WebhookResponse { status, event_type }))
}
