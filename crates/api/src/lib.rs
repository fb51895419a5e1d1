// API crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Signals API library
//!
//! HTTP server for the subscription-gated trading-signals service:
//! authentication, quota-limited signal delivery, and billing endpoints.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod signals;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
