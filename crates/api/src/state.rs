//! Shared application state.

use sqlx::PgPool;

use signals_billing::{EntitlementLedger, PaymentClient, WebhookProcessor};
use signals_shared::{QuotaStore, RateLimiter};

use crate::auth::JwtManager;
use crate::config::Config;
use crate::signals::SignalCache;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub quota_store: QuotaStore,
    pub rate_limiter: RateLimiter,
    pub signal_cache: SignalCache,
    pub payment: PaymentClient,
    pub ledger: EntitlementLedger,
}

impl AppState {
    pub async fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let quota_store = QuotaStore::connect(&config.redis_url, config.quota_store_timeout).await;
        let rate_limiter = RateLimiter::new(quota_store.clone());
        let signal_cache = SignalCache::new(quota_store.clone(), config.signal_cache_ttl_seconds);
        let payment = PaymentClient::from_env()?;
        let ledger = EntitlementLedger::postgres(pool.clone());

        if payment.is_mock() {
            tracing::warn!("Payment provider is mocked; checkout sessions are not real");
        }

        Ok(Self {
            pool,
            config,
            jwt_manager,
            quota_store,
            rate_limiter,
            signal_cache,
            payment,
            ledger,
        })
    }

    pub fn webhook_processor(&self) -> WebhookProcessor {
        WebhookProcessor::new(
            self.quota_store.clone(),
            self.ledger.clone(),
            self.config.webhook_dedupe_ttl_seconds,
        )
    }

    /// State wired to in-memory backends and a lazy (never-connected)
    /// database pool, for router tests that stay off the database.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use sqlx::postgres::PgPoolOptions;

        let config = Config::test_defaults();
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool from static url");
        let quota_store = QuotaStore::in_memory();

        Self {
            pool,
            jwt_manager: JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours),
            quota_store: quota_store.clone(),
            rate_limiter: RateLimiter::new(quota_store.clone()),
            signal_cache: SignalCache::new(quota_store, config.signal_cache_ttl_seconds),
            payment: PaymentClient::mock(),
            ledger: EntitlementLedger::in_memory(),
            config,
        }
    }
}
