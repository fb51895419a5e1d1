//! Payment-provider webhook processing.
//!
//! The provider delivers events at-least-once, so every event must be
//! applied to the entitlement ledger exactly once. Deduplication rides on
//! the shared quota store: the event id is claimed atomically (increment on
//! a presence marker) before any side effect runs, so concurrent retries of
//! the same delivery race only on the claim, never on the ledger write.

use signals_shared::QuotaStore;

use crate::client::{PaymentEvent, PaymentEventKind};
use crate::entitlement::EntitlementLedger;
use crate::error::BillingResult;

/// Terminal outcome for a verified event. Rejection (signature failure)
/// happens upstream in the payment client, before any marker is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    SkippedDuplicate,
}

/// Applies verified payment events to the entitlement ledger, exactly once
/// per event identifier.
#[derive(Clone)]
pub struct WebhookProcessor {
    store: QuotaStore,
    ledger: EntitlementLedger,
    dedupe_ttl_seconds: u64,
}

impl WebhookProcessor {
    /// `dedupe_ttl_seconds` must cover the provider's maximum retry span
    /// (24h for Stripe).
    pub fn new(store: QuotaStore, ledger: EntitlementLedger, dedupe_ttl_seconds: u64) -> Self {
        Self {
            store,
            ledger,
            dedupe_ttl_seconds,
        }
    }

    pub async fn process(&self, event: PaymentEvent) -> BillingResult<WebhookOutcome> {
        let marker_key = format!("payment-event:{}", event.id);

        // Atomic claim: only the first delivery of this event id sees 1.
        // Marking happens before side effects; a crash between the claim
        // and the ledger write leaves the event skipped until the marker
        // TTL lapses. Accepted narrow window, no reconciliation pass.
        let claim = self.store.increment(&marker_key).await;
        if claim > 1 {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.kind.as_str(),
                "Duplicate webhook delivery, skipping"
            );
            return Ok(WebhookOutcome::SkippedDuplicate);
        }
        self.store.expire(&marker_key, self.dedupe_ttl_seconds).await;

        match &event.kind {
            PaymentEventKind::CheckoutCompleted | PaymentEventKind::PaymentSucceeded => {
                self.apply_entitlement(&event, true).await?;
            }
            PaymentEventKind::SubscriptionCancelled => {
                self.apply_entitlement(&event, false).await?;
            }
            PaymentEventKind::Other(event_type) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "No handler for event type, acknowledging without side effects"
                );
            }
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn apply_entitlement(&self, event: &PaymentEvent, is_paid: bool) -> BillingResult<()> {
        let Some(customer_ref) = event.customer_ref.as_deref() else {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.kind.as_str(),
                "Event carries no customer reference, ignoring"
            );
            return Ok(());
        };

        match self
            .ledger
            .set_paid_by_customer_ref(customer_ref, is_paid)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    event_id = %event.id,
                    customer_id = %customer_ref,
                    is_paid = is_paid,
                    "Entitlement updated"
                );
                Ok(())
            }
            Ok(false) => {
                // The provider will not usefully retry a logic mismatch,
                // so acknowledge and move on.
                tracing::info!(
                    event_id = %event.id,
                    customer_id = %customer_ref,
                    "No account matches customer reference, ignoring"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    customer_id = %customer_ref,
                    error = %e,
                    "Entitlement write failed after idempotency marker was set; \
                     manual reconciliation may be required"
                );
                Err(e)
            }
        }
    }
}
