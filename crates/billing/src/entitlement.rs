//! Entitlement ledger.
//!
//! The durable record of each account's paid/free tier and its payment
//! customer reference. The only mutators are `set_customer_ref` (assigned
//! once by the checkout-initiation flow, first-writer-wins) and
//! `set_paid_by_customer_ref` (applied only by the webhook processor).
//! Writes commit to the backing store before the triggering webhook is
//! acknowledged; quota state never lives here.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Clone, Debug, Default)]
struct MemoryAccount {
    customer_ref: Option<String>,
    is_paid: bool,
}

#[derive(Clone)]
enum LedgerBackend {
    Postgres(PgPool),
    Memory(Arc<Mutex<HashMap<Uuid, MemoryAccount>>>),
}

/// Account entitlement state, backed by Postgres in production or an
/// in-process map for tests and database-less development.
#[derive(Clone)]
pub struct EntitlementLedger {
    backend: LedgerBackend,
}

impl EntitlementLedger {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            backend: LedgerBackend::Postgres(pool),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: LedgerBackend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Seed an account into the in-memory backend. Postgres accounts are
    /// created by the signup flow, so this is a no-op there.
    pub async fn register_account(&self, account_id: Uuid) {
        if let LedgerBackend::Memory(accounts) = &self.backend {
            accounts
                .lock()
                .await
                .entry(account_id)
                .or_insert_with(MemoryAccount::default);
        }
    }

    /// Assign the payment customer reference for an account. Writes only
    /// if currently unset; returns whether this call performed the write.
    /// A customer reference is never overwritten once assigned (1:1
    /// account-to-customer binding for the account's lifetime).
    pub async fn set_customer_ref(
        &self,
        account_id: Uuid,
        customer_ref: &str,
    ) -> BillingResult<bool> {
        match &self.backend {
            LedgerBackend::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE users SET stripe_customer_id = $2 \
                     WHERE id = $1 AND stripe_customer_id IS NULL",
                )
                .bind(account_id)
                .bind(customer_ref)
                .execute(pool)
                .await?;
                Ok(result.rows_affected() > 0)
            }
            LedgerBackend::Memory(accounts) => {
                let mut accounts = accounts.lock().await;
                let account = accounts.entry(account_id).or_default();
                if account.customer_ref.is_some() {
                    return Ok(false);
                }
                account.customer_ref = Some(customer_ref.to_string());
                Ok(true)
            }
        }
    }

    pub async fn customer_ref(&self, account_id: Uuid) -> BillingResult<Option<String>> {
        match &self.backend {
            LedgerBackend::Postgres(pool) => {
                let row: Option<(Option<String>,)> =
                    sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                        .bind(account_id)
                        .fetch_optional(pool)
                        .await?;
                Ok(row.and_then(|(customer_ref,)| customer_ref))
            }
            LedgerBackend::Memory(accounts) => Ok(accounts
                .lock()
                .await
                .get(&account_id)
                .and_then(|account| account.customer_ref.clone())),
        }
    }

    /// Flip the paid flag for the account bound to the given customer
    /// reference. Returns whether any account matched; an unmatched
    /// reference is the caller's no-op case, not an error.
    pub async fn set_paid_by_customer_ref(
        &self,
        customer_ref: &str,
        is_paid: bool,
    ) -> BillingResult<bool> {
        match &self.backend {
            LedgerBackend::Postgres(pool) => {
                let result =
                    sqlx::query("UPDATE users SET is_paid = $2 WHERE stripe_customer_id = $1")
                        .bind(customer_ref)
                        .bind(is_paid)
                        .execute(pool)
                        .await?;
                Ok(result.rows_affected() > 0)
            }
            LedgerBackend::Memory(accounts) => {
                let mut accounts = accounts.lock().await;
                let account = accounts
                    .values_mut()
                    .find(|account| account.customer_ref.as_deref() == Some(customer_ref));
                match account {
                    Some(account) => {
                        account.is_paid = is_paid;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    pub async fn is_paid(&self, account_id: Uuid) -> BillingResult<bool> {
        match &self.backend {
            LedgerBackend::Postgres(pool) => {
                let row: Option<(bool,)> =
                    sqlx::query_as("SELECT is_paid FROM users WHERE id = $1")
                        .bind(account_id)
                        .fetch_optional(pool)
                        .await?;
                Ok(row.map(|(is_paid,)| is_paid).unwrap_or(false))
            }
            LedgerBackend::Memory(accounts) => Ok(accounts
                .lock()
                .await
                .get(&account_id)
                .map(|account| account.is_paid)
                .unwrap_or(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_customer_ref_is_first_writer_wins() {
        let ledger = EntitlementLedger::in_memory();
        let account_id = Uuid::new_v4();
        ledger.register_account(account_id).await;

        assert!(ledger.set_customer_ref(account_id, "cus_1").await.unwrap());
        assert!(!ledger.set_customer_ref(account_id, "cus_2").await.unwrap());
        assert_eq!(
            ledger.customer_ref(account_id).await.unwrap().as_deref(),
            Some("cus_1")
        );
    }

    #[tokio::test]
    async fn test_set_paid_by_customer_ref() {
        let ledger = EntitlementLedger::in_memory();
        let account_id = Uuid::new_v4();
        ledger.register_account(account_id).await;
        ledger.set_customer_ref(account_id, "cus_1").await.unwrap();

        assert!(!ledger.is_paid(account_id).await.unwrap());
        assert!(ledger.set_paid_by_customer_ref("cus_1", true).await.unwrap());
        assert!(ledger.is_paid(account_id).await.unwrap());
        assert!(ledger.set_paid_by_customer_ref("cus_1", false).await.unwrap());
        assert!(!ledger.is_paid(account_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_customer_ref_matches_nothing() {
        let ledger = EntitlementLedger::in_memory();
        assert!(!ledger
            .set_paid_by_customer_ref("cus_ghost", true)
            .await
            .unwrap());
    }
}
