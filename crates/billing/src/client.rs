//! Payment-provider client.
//!
//! Capability interface with two implementations selected by configuration:
//! the real Stripe client, and a mock used for local development and tests.
//! The rest of the system only consumes "create customer / create checkout
//! session -> opaque id" and "verify signature -> typed event"; everything
//! Stripe-specific stays in this module.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCustomer, Customer, Event, EventObject, Webhook,
};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Stripe signature timestamp tolerance (seconds).
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Stripe configuration from environment variables.
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Price for the single paid plan sold through checkout.
    pub price_id: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: require_env("STRIPE_SECRET_KEY")?,
            webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
            price_id: require_env("STRIPE_PRICE_ID")?,
        })
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name).map_err(|_| BillingError::Config(format!("{} is not set", name)))
}

/// Kind of payment-provider event, reduced to the transitions the
/// entitlement ledger cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEventKind {
    CheckoutCompleted,
    PaymentSucceeded,
    SubscriptionCancelled,
    /// Any other event type. Not an error: processed as a no-op.
    Other(String),
}

impl PaymentEventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => PaymentEventKind::CheckoutCompleted,
            "invoice.payment_succeeded" => PaymentEventKind::PaymentSucceeded,
            "customer.subscription.deleted" => PaymentEventKind::SubscriptionCancelled,
            other => PaymentEventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentEventKind::CheckoutCompleted => "checkout.session.completed",
            PaymentEventKind::PaymentSucceeded => "invoice.payment_succeeded",
            PaymentEventKind::SubscriptionCancelled => "customer.subscription.deleted",
            PaymentEventKind::Other(kind) => kind,
        }
    }
}

/// A verified payment-provider event.
#[derive(Clone, Debug)]
pub struct PaymentEvent {
    /// Provider event identifier, used as the idempotency key.
    pub id: String,
    pub kind: PaymentEventKind,
    /// The provider customer reference the event applies to, if any.
    pub customer_ref: Option<String>,
}

/// Result of creating a checkout session.
#[derive(Clone, Debug)]
pub struct CheckoutSessionInfo {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Clone)]
enum PaymentBackend {
    Stripe {
        client: stripe::Client,
        config: StripeConfig,
    },
    Mock,
}

/// Payment-provider client with Stripe and mock backends.
#[derive(Clone)]
pub struct PaymentClient {
    backend: PaymentBackend,
}

impl PaymentClient {
    pub fn stripe(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            backend: PaymentBackend::Stripe { client, config },
        }
    }

    pub fn mock() -> Self {
        Self {
            backend: PaymentBackend::Mock,
        }
    }

    /// Select the backend from `PAYMENT_PROVIDER` (`stripe`, the default,
    /// or `mock`).
    pub fn from_env() -> BillingResult<Self> {
        let provider = std::env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "stripe".to_string());
        match provider.as_str() {
            "mock" => {
                tracing::warn!("Using mock payment provider (PAYMENT_PROVIDER=mock)");
                Ok(Self::mock())
            }
            "stripe" => Ok(Self::stripe(StripeConfig::from_env()?)),
            other => Err(BillingError::Config(format!(
                "Unknown PAYMENT_PROVIDER '{}', expected 'stripe' or 'mock'",
                other
            ))),
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.backend, PaymentBackend::Mock)
    }

    /// Create a provider customer for the account and return its opaque
    /// reference.
    pub async fn create_customer(&self, email: &str, account_id: Uuid) -> BillingResult<String> {
        match &self.backend {
            PaymentBackend::Stripe { client, .. } => {
                let mut metadata = HashMap::new();
                metadata.insert("account_id".to_string(), account_id.to_string());

                let params = CreateCustomer {
                    email: Some(email),
                    metadata: Some(metadata),
                    ..Default::default()
                };
                let customer = Customer::create(client, params).await?;

                tracing::info!(
                    account_id = %account_id,
                    customer_id = %customer.id,
                    "Created Stripe customer"
                );
                Ok(customer.id.to_string())
            }
            PaymentBackend::Mock => {
                let local_part = email.split('@').next().unwrap_or("user");
                Ok(format!("cus_mock_{}", local_part))
            }
        }
    }

    /// Create a subscription checkout session for the configured price.
    pub async fn create_checkout_session(
        &self,
        customer_ref: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutSessionInfo> {
        match &self.backend {
            PaymentBackend::Stripe { client, config } => {
                let customer_id = customer_ref
                    .parse::<stripe::CustomerId>()
                    .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

                let mut params = CreateCheckoutSession::new();
                params.customer = Some(customer_id);
                params.mode = Some(CheckoutSessionMode::Subscription);
                params.line_items = Some(vec![CreateCheckoutSessionLineItems {
                    price: Some(config.price_id.clone()),
                    quantity: Some(1),
                    ..Default::default()
                }]);
                params.success_url = Some(success_url);
                params.cancel_url = Some(cancel_url);

                let session = CheckoutSession::create(client, params).await?;
                let checkout_url = session.url.ok_or_else(|| {
                    BillingError::StripeApi("Checkout session has no URL".to_string())
                })?;

                tracing::info!(
                    customer_id = %customer_ref,
                    session_id = %session.id,
                    "Created checkout session"
                );
                Ok(CheckoutSessionInfo {
                    session_id: session.id.to_string(),
                    checkout_url,
                })
            }
            PaymentBackend::Mock => Ok(CheckoutSessionInfo {
                session_id: "cs_test_mock_session".to_string(),
                checkout_url: "https://checkout.stripe.com/pay/cs_test_mock_session".to_string(),
            }),
        }
    }

    /// Verify the webhook signature and reduce the event to a
    /// [`PaymentEvent`]. A verification failure returns
    /// [`BillingError::WebhookSignatureInvalid`] without touching any
    /// shared state.
    pub fn verify_and_parse(&self, payload: &str, signature: &str) -> BillingResult<PaymentEvent> {
        match &self.backend {
            PaymentBackend::Stripe { config, .. } => {
                // Try the library verification first; fall back to manual
                // verification for Stripe API versions the library does not
                // recognize.
                if let Ok(event) = Webhook::construct_event(payload, signature, &config.webhook_secret)
                {
                    return Ok(reduce_stripe_event(event));
                }

                let now = time::OffsetDateTime::now_utc().unix_timestamp();
                verify_stripe_signature(payload, signature, &config.webhook_secret, now)?;

                let event: Event = serde_json::from_str(payload).map_err(|e| {
                    BillingError::MalformedPayload(format!("Webhook event JSON: {}", e))
                })?;
                tracing::debug!(event_id = %event.id, "Manual webhook signature verification passed");
                Ok(reduce_stripe_event(event))
            }
            PaymentBackend::Mock => {
                if signature != "mock-signature" {
                    return Err(BillingError::WebhookSignatureInvalid);
                }
                let event: MockEvent = serde_json::from_str(payload).map_err(|e| {
                    BillingError::MalformedPayload(format!("Webhook event JSON: {}", e))
                })?;
                Ok(PaymentEvent {
                    id: event.id,
                    kind: PaymentEventKind::from_event_type(&event.event_type),
                    customer_ref: event.data.object.customer,
                })
            }
        }
    }
}

/// Verify a Stripe `t=..,v1=..` signature header against the raw payload.
fn verify_stripe_signature(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1_signature = Some(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        return Err(BillingError::WebhookSignatureInvalid);
    }
    Ok(())
}

/// Reduce a verified Stripe event to the fields the webhook processor
/// consumes.
fn reduce_stripe_event(event: Event) -> PaymentEvent {
    let customer_ref = match &event.data.object {
        EventObject::CheckoutSession(session) => session.customer.as_ref().map(|c| match c {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(customer) => customer.id.to_string(),
        }),
        EventObject::Invoice(invoice) => invoice.customer.as_ref().map(|c| match c {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(customer) => customer.id.to_string(),
        }),
        EventObject::Subscription(subscription) => Some(match &subscription.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(customer) => customer.id.to_string(),
        }),
        _ => None,
    };

    PaymentEvent {
        id: event.id.to_string(),
        kind: PaymentEventKind::from_event_type(&event.type_.to_string()),
        customer_ref,
    }
}

#[derive(Debug, Deserialize)]
struct MockEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: MockEventData,
}

#[derive(Debug, Default, Deserialize)]
struct MockEventData {
    #[serde(default)]
    object: MockEventObject,
}

#[derive(Debug, Default, Deserialize)]
struct MockEventObject {
    customer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_manual_signature_verification_accepts_valid_header() {
        let payload = r#"{"id":"evt_1"}"#;
        let secret = "whsec_test_secret";
        let now = 1_756_500_000;

        let header = sign(payload, secret, now);
        assert!(verify_stripe_signature(payload, &header, secret, now).is_ok());
    }

    #[test]
    fn test_manual_signature_verification_rejects_tampered_payload() {
        let secret = "whsec_test_secret";
        let now = 1_756_500_000;

        let header = sign(r#"{"id":"evt_1"}"#, secret, now);
        let result = verify_stripe_signature(r#"{"id":"evt_2"}"#, &header, secret, now);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_manual_signature_verification_rejects_stale_timestamp() {
        let payload = r#"{"id":"evt_1"}"#;
        let secret = "whsec_test_secret";
        let signed_at = 1_756_500_000;

        let header = sign(payload, secret, signed_at);
        // 301 seconds later: outside the 300-second tolerance
        let result = verify_stripe_signature(payload, &header, secret, signed_at + 301);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
        // 300 seconds later: still inside
        assert!(verify_stripe_signature(payload, &header, secret, signed_at + 300).is_ok());
    }

    #[test]
    fn test_manual_signature_verification_rejects_missing_parts() {
        let result = verify_stripe_signature("{}", "v1=abc", "whsec_s", 0);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
        let result = verify_stripe_signature("{}", "t=123", "whsec_s", 123);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            PaymentEventKind::from_event_type("checkout.session.completed"),
            PaymentEventKind::CheckoutCompleted
        );
        assert_eq!(
            PaymentEventKind::from_event_type("invoice.payment_succeeded"),
            PaymentEventKind::PaymentSucceeded
        );
        assert_eq!(
            PaymentEventKind::from_event_type("customer.subscription.deleted"),
            PaymentEventKind::SubscriptionCancelled
        );
        assert_eq!(
            PaymentEventKind::from_event_type("invoice.finalized"),
            PaymentEventKind::Other("invoice.finalized".to_string())
        );
    }

    #[test]
    fn test_mock_backend_parses_event() {
        let client = PaymentClient::mock();
        let payload = r#"{
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": {"object": {"customer": "cus_mock_alice"}}
        }"#;

        let event = client.verify_and_parse(payload, "mock-signature").unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.kind, PaymentEventKind::CheckoutCompleted);
        assert_eq!(event.customer_ref.as_deref(), Some("cus_mock_alice"));
    }

    #[test]
    fn test_mock_backend_rejects_bad_signature() {
        let client = PaymentClient::mock();
        let result = client.verify_and_parse(r#"{"id":"evt_123","type":"x"}"#, "wrong");
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[tokio::test]
    async fn test_mock_backend_checkout_flow() {
        let client = PaymentClient::mock();
        let customer = client
            .create_customer("alice@example.com", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(customer, "cus_mock_alice");

        let session = client
            .create_checkout_session(&customer, "https://app/success", "https://app/cancel")
            .await
            .unwrap();
        assert!(session.checkout_url.starts_with("https://"));
        assert!(!session.session_id.is_empty());
    }
}
