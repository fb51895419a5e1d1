//! Day-keyed signal cache riding on the shared quota store.
//!
//! One full (untruncated) batch is cached per day key, so a single entry
//! serves both tiers. Concurrent misses may each compute a batch; the
//! last write wins, which is acceptable for interchangeable mock data.

use signals_shared::QuotaStore;

use super::generator::Signal;

#[derive(Clone)]
pub struct SignalCache {
    store: QuotaStore,
    ttl_seconds: u64,
}

impl SignalCache {
    pub fn new(store: QuotaStore, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Return the cached batch for `day_key`, computing and storing a
    /// fresh one on miss. An undecodable cached value is discarded and
    /// recomputed rather than surfaced.
    pub async fn get_or_compute<F>(&self, day_key: &str, compute: F) -> serde_json::Result<Vec<Signal>>
    where
        F: FnOnce() -> Vec<Signal>,
    {
        let cache_key = format!("signals:all:{day_key}");

        if let Some(cached) = self.store.get(&cache_key).await {
            match serde_json::from_str(&cached) {
                Ok(signals) => {
                    tracing::debug!(day_key = %day_key, "Serving cached signals");
                    return Ok(signals);
                }
                Err(e) => {
                    tracing::warn!(
                        day_key = %day_key,
                        error = %e,
                        "Discarding undecodable cached signal batch"
                    );
                    self.store.delete(&cache_key).await;
                }
            }
        }

        let signals = compute();
        let payload = serde_json::to_string(&signals)?;
        self.store
            .set_with_ttl(&cache_key, &payload, self.ttl_seconds)
            .await;
        tracing::debug!(day_key = %day_key, count = signals.len(), "Cached fresh signal batch");
        Ok(signals)
    }
}
