//! Wallet Ledger - sole mutator of monetary state
//!
//! Every mutation for a user runs a load → apply → save cycle under that
//! user's lock, so concurrent updates to one wallet never lose a write.
//! Distinct users proceed in parallel.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{Wallet, WalletUpdate};
use crate::error::{FinError, Result};
use crate::persistence::Store;

pub struct WalletLedger {
    store: Arc<dyn Store>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `op` against the user's wallet under the user lock and persist the
    /// result. The wallet is created zeroed on first touch. If `op` fails
    /// nothing is written.
    ///
    /// The lock entry is dropped again once no other mutation holds or
    /// waits on it, so the table only holds users with work in progress.
    async fn mutate<F>(&self, user_id: &str, op: F) -> Result<Wallet>
    where
        F: FnOnce(&mut Wallet) -> Result<()> + Send,
    {
        if user_id.trim().is_empty() {
            return Err(FinError::Validation("user_id is required".into()));
        }

        let lock = self.user_lock(user_id);
        let result: Result<Wallet> = async {
            let _guard = lock.lock().await;

            let mut wallet = self
                .store
                .get_wallet(user_id)
                .await?
                .unwrap_or_else(|| Wallet::new(user_id));
            op(&mut wallet)?;
            self.store.save_wallet(&wallet).await?;
            Ok(wallet)
        }
        .await;

        drop(lock);
        // entry() and remove_if() share the shard lock, so no new holder can
        // clone the Arc between the count check and the removal
        self.locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Apply a signed amount to the balance or frozen bucket.
    pub async fn update_wallet(
        &self,
        user_id: &str,
        amount: Decimal,
        update: WalletUpdate,
    ) -> Result<Wallet> {
        let wallet = self
            .mutate(user_id, |wallet| wallet.apply(amount, update))
            .await?;
        debug!(
            "Wallet {} updated by {} (frozen: {}, withdrawal: {}) -> balance {}, frozen {}",
            user_id, amount, update.frozen, update.withdrawal, wallet.balance, wallet.frozen_amount
        );
        Ok(wallet)
    }

    /// Freeze `amount` of the available balance (balance − frozen).
    pub async fn reserve(&self, user_id: &str, amount: Decimal) -> Result<Wallet> {
        let wallet = self
            .mutate(user_id, |wallet| wallet.reserve(amount))
            .await?;
        info!("Reserved {} for withdrawal from wallet {}", amount, user_id);
        Ok(wallet)
    }

    /// Return previously frozen funds to the available balance.
    pub async fn release(&self, user_id: &str, amount: Decimal) -> Result<Wallet> {
        let wallet = self
            .mutate(user_id, |wallet| wallet.apply(-amount, WalletUpdate::FROZEN))
            .await?;
        info!("Released {} frozen funds in wallet {}", amount, user_id);
        Ok(wallet)
    }

    /// Debit a reserved withdrawal: frozen and balance both drop by `amount`.
    pub async fn settle_withdrawal(&self, user_id: &str, amount: Decimal) -> Result<Wallet> {
        let wallet = self
            .mutate(user_id, |wallet| wallet.settle_withdrawal(amount))
            .await?;
        info!("Settled withdrawal of {} from wallet {}", amount, user_id);
        Ok(wallet)
    }

    /// Compensate an earlier credit.
    pub async fn reverse_credit(&self, user_id: &str, amount: Decimal) -> Result<Wallet> {
        let wallet = self
            .mutate(user_id, |wallet| wallet.reverse_credit(amount))
            .await?;
        info!("Reversed credit of {} in wallet {}", amount, user_id);
        Ok(wallet)
    }

    pub async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        self.store.get_wallet(user_id).await
    }
}
