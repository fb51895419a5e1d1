//! Mock trading-signal generation.
//!
//! Stands in for an expensive upstream signal computation. Prices are
//! drawn around fixed index levels; no market data is consulted.

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const SIGNAL_KINDS: [&str; 3] = ["BUY", "SELL", "HOLD"];
const SIGNALS_PER_SYMBOL: usize = 5;

/// (symbol, base price, max deviation either side)
const SYMBOLS: [(&str, f64, f64); 2] = [
    ("NIFTY", 21_500.0, 500.0),
    ("BANKNIFTY", 45_000.0, 1_000.0),
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub price: f64,
    pub confidence: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Generate a fresh batch of signals for all tracked symbols.
pub fn generate_signals() -> Vec<Signal> {
    let mut rng = rand::rng();
    let now = OffsetDateTime::now_utc();

    let mut signals = Vec::with_capacity(SYMBOLS.len() * SIGNALS_PER_SYMBOL);
    for (symbol, base, spread) in SYMBOLS {
        for _ in 0..SIGNALS_PER_SYMBOL {
            signals.push(Signal {
                symbol: symbol.to_string(),
                kind: SIGNAL_KINDS[rng.random_range(0..SIGNAL_KINDS.len())].to_string(),
                price: round2(base + rng.random_range(-spread..spread)),
                confidence: round2(rng.random_range(0.6..0.95)),
                timestamp: now,
            });
        }
    }
    signals
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
