//! Shared key-value quota store.
//!
//! One store backs all three counter kinds (rate-limit counters, cached
//! signal batches, processed-webhook markers), namespace-separated by key
//! prefix. The backend is Redis in production and an in-process map for
//! tests and local development. Redis failures never surface to callers:
//! every operation fails open to the in-process fallback and flags the
//! store as degraded for observability.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default per-operation timeout for the Redis backend.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() > deadline)
    }
}

/// In-process key-value store with TTL support.
///
/// Serves two roles: the fail-open fallback when Redis is unreachable, and
/// the primary backend for tests and single-instance local development.
/// All operations are atomic with respect to concurrent callers (single
/// async mutex around the map).
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
    }

    /// Atomic increment; an absent (or expired) key initializes to 1 with
    /// no TTL. Callers attach a TTL via `expire` or by seeding the key
    /// with `set_with_ttl`.
    pub async fn increment(&self, key: &str) -> i64 {
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired()) {
            entries.remove(key);
        }
        match entries.get_mut(key) {
            Some(entry) => {
                let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
                entry.value = next.to_string();
                next
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                1
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired() {
                entries.remove(key);
            } else {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryStore),
}

/// Shared quota store used for rate limiting, signal caching, and webhook
/// idempotency markers.
///
/// The service runs as multiple concurrent instances, so all cross-request
/// coordination goes through this store rather than in-process locks. When
/// the Redis backend errors or times out, operations degrade to a local
/// [`MemoryStore`], trading cross-instance correctness for availability.
#[derive(Clone)]
pub struct QuotaStore {
    backend: Backend,
    fallback: MemoryStore,
    degraded: Arc<AtomicBool>,
    op_timeout: Duration,
}

impl QuotaStore {
    /// Connect to Redis, falling back to an in-process store if the server
    /// is unreachable at startup.
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> Self {
        match Self::try_connect(redis_url, op_timeout).await {
            Ok(store) => {
                tracing::info!("Connected to shared quota store");
                store
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Shared quota store unreachable at startup, using in-process store (degraded mode)"
                );
                Self::in_memory()
            }
        }
    }

    async fn try_connect(redis_url: &str, op_timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut manager = timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("connection attempt timed out"))??;
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;
        Ok(Self {
            backend: Backend::Redis(manager),
            fallback: MemoryStore::new(),
            degraded: Arc::new(AtomicBool::new(false)),
            op_timeout,
        })
    }

    /// Purely in-process store. Used by tests and by deployments without a
    /// Redis server.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::new()),
            fallback: MemoryStore::new(),
            degraded: Arc::new(AtomicBool::new(false)),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// True while operations are being served by the local fallback
    /// instead of the shared backend.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match &self.backend {
            Backend::Memory(store) => store.get(key).await,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let redis_key = key.to_string();
                let op = async move {
                    let value: Option<String> = conn.get(&redis_key).await?;
                    Ok::<_, redis::RedisError>(value)
                };
                match timeout(self.op_timeout, op).await {
                    Ok(Ok(value)) => {
                        self.mark_healthy();
                        value
                    }
                    Ok(Err(e)) => {
                        self.mark_degraded(&e.to_string());
                        self.fallback.get(key).await
                    }
                    Err(_) => {
                        self.mark_degraded("operation timed out");
                        self.fallback.get(key).await
                    }
                }
            }
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) {
        match &self.backend {
            Backend::Memory(store) => store.set_with_ttl(key, value, ttl_seconds).await,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let redis_key = key.to_string();
                let redis_value = value.to_string();
                let op = async move {
                    conn.set_ex::<_, _, ()>(&redis_key, redis_value, ttl_seconds)
                        .await
                };
                match timeout(self.op_timeout, op).await {
                    Ok(Ok(())) => self.mark_healthy(),
                    Ok(Err(e)) => {
                        self.mark_degraded(&e.to_string());
                        self.fallback.set_with_ttl(key, value, ttl_seconds).await;
                    }
                    Err(_) => {
                        self.mark_degraded("operation timed out");
                        self.fallback.set_with_ttl(key, value, ttl_seconds).await;
                    }
                }
            }
        }
    }

    /// Atomic increment, creating and initializing the counter to 1 when
    /// the key is absent. Returns the new value.
    pub async fn increment(&self, key: &str) -> i64 {
        match &self.backend {
            Backend::Memory(store) => store.increment(key).await,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let redis_key = key.to_string();
                let op = async move {
                    let value: i64 = conn.incr(&redis_key, 1i64).await?;
                    Ok::<_, redis::RedisError>(value)
                };
                match timeout(self.op_timeout, op).await {
                    Ok(Ok(value)) => {
                        self.mark_healthy();
                        value
                    }
                    Ok(Err(e)) => {
                        self.mark_degraded(&e.to_string());
                        self.fallback.increment(key).await
                    }
                    Err(_) => {
                        self.mark_degraded("operation timed out");
                        self.fallback.increment(key).await
                    }
                }
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) {
        match &self.backend {
            Backend::Memory(store) => store.expire(key, ttl_seconds).await,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let redis_key = key.to_string();
                let op = async move { conn.expire::<_, ()>(&redis_key, ttl_seconds as i64).await };
                match timeout(self.op_timeout, op).await {
                    Ok(Ok(())) => self.mark_healthy(),
                    Ok(Err(e)) => {
                        self.mark_degraded(&e.to_string());
                        self.fallback.expire(key, ttl_seconds).await;
                    }
                    Err(_) => {
                        self.mark_degraded("operation timed out");
                        self.fallback.expire(key, ttl_seconds).await;
                    }
                }
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        match &self.backend {
            Backend::Memory(store) => store.delete(key).await,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let redis_key = key.to_string();
                let op = async move { conn.del::<_, ()>(&redis_key).await };
                match timeout(self.op_timeout, op).await {
                    Ok(Ok(())) => self.mark_healthy(),
                    Ok(Err(e)) => {
                        self.mark_degraded(&e.to_string());
                        self.fallback.delete(key).await;
                    }
                    Err(_) => {
                        self.mark_degraded("operation timed out");
                        self.fallback.delete(key).await;
                    }
                }
            }
        }
    }

    // Log only on transitions so a flapping backend doesn't flood the logs.
    fn mark_degraded(&self, error: &str) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                error = %error,
                "Quota store unreachable, failing open to in-process fallback"
            );
        }
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            tracing::info!("Quota store reachable again, leaving degraded mode");
        }
    }
}
