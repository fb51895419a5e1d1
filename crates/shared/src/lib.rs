// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared infrastructure for the signals service.
//!
//! Contains the quota store (Redis with fail-open in-process fallback),
//! the fixed-window rate limiter built on top of it, and database pool
//! helpers. No HTTP or payment-provider knowledge lives here.

pub mod db;
pub mod rate_limit;
pub mod store;

pub use db::{create_pool, run_migrations};
pub use rate_limit::{QuotaWindow, RateLimitResult, RateLimiter};
pub use store::{MemoryStore, QuotaStore};
