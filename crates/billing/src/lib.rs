// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Billing module for the signals service.
//!
//! Handles the payment-provider integration that gates the paid tier:
//!
//! - **Payment client**: Stripe (or a configuration-selected mock) for
//!   customer creation, checkout sessions, and webhook verification
//! - **Entitlement ledger**: durable paid/free state per account
//! - **Webhook processor**: exactly-once application of provider events
//!   under at-least-once delivery

pub mod client;
pub mod entitlement;
pub mod error;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

pub use client::{
    CheckoutSessionInfo, PaymentClient, PaymentEvent, PaymentEventKind, StripeConfig,
};
pub use entitlement::EntitlementLedger;
pub use error::{BillingError, BillingResult};
pub use webhooks::{WebhookOutcome, WebhookProcessor};
