//! Trading-signal generation and the day-keyed result cache.

pub mod cache;
pub mod generator;

pub use cache::SignalCache;
pub use generator::{generate_signals, Signal};
