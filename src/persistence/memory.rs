//! In-memory store
//!
//! Backs tests and local runs. Each collection sits behind its own lock;
//! results of `find_*` are ordered by creation time.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::store::Store;
use crate::domain::{
    CommissionFilter, CommissionRecord, Order, OrderStatus, Settlement, SettlementFilter, Wallet,
};
use crate::error::{FinError, Result};

#[derive(Default)]
pub struct InMemoryStore {
    orders: RwLock<HashMap<String, Order>>,
    commissions: RwLock<HashMap<String, CommissionRecord>>,
    wallets: RwLock<HashMap<String, Wallet>>,
    settlements: RwLock<HashMap<String, Settlement>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wallet currently stored
    pub async fn wallets(&self) -> Vec<Wallet> {
        self.wallets.read().await.values().cloned().collect()
    }
}

fn insert_new<T: Clone>(map: &mut HashMap<String, T>, id: &str, value: &T) -> Result<()> {
    if map.contains_key(id) {
        return Err(FinError::Validation(format!("duplicate id {id}")));
    }
    map.insert(id.to_string(), value.clone());
    Ok(())
}

fn replace<T: Clone>(
    map: &mut HashMap<String, T>,
    entity: &'static str,
    id: &str,
    value: &T,
) -> Result<()> {
    match map.get_mut(id) {
        Some(slot) => {
            *slot = value.clone();
            Ok(())
        }
        None => Err(FinError::not_found(entity, id)),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        insert_new(&mut *self.orders.write().await, &order.id, order)
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        replace(&mut *self.orders.write().await, "order", &order.id, order)
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn find_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|o| o.created_at);
        Ok(found)
    }

    async fn insert_commission(&self, record: &CommissionRecord) -> Result<()> {
        insert_new(&mut *self.commissions.write().await, &record.id, record)
    }

    async fn update_commission(&self, record: &CommissionRecord) -> Result<()> {
        replace(
            &mut *self.commissions.write().await,
            "commission record",
            &record.id,
            record,
        )
    }

    async fn get_commission(&self, id: &str) -> Result<Option<CommissionRecord>> {
        Ok(self.commissions.read().await.get(id).cloned())
    }

    async fn find_commissions(&self, filter: &CommissionFilter) -> Result<Vec<CommissionRecord>> {
        let records = self.commissions.read().await;
        let mut found: Vec<CommissionRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        Ok(self.wallets.read().await.get(user_id).cloned())
    }

    async fn save_wallet(&self, wallet: &Wallet) -> Result<()> {
        self.wallets
            .write()
            .await
            .insert(wallet.user_id.clone(), wallet.clone());
        Ok(())
    }

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<()> {
        insert_new(&mut *self.settlements.write().await, &settlement.id, settlement)
    }

    async fn update_settlement(&self, settlement: &Settlement) -> Result<()> {
        replace(
            &mut *self.settlements.write().await,
            "settlement",
            &settlement.id,
            settlement,
        )
    }

    async fn get_settlement(&self, id: &str) -> Result<Option<Settlement>> {
        Ok(self.settlements.read().await.get(id).cloned())
    }

    async fn find_settlements(&self, filter: &SettlementFilter) -> Result<Vec<Settlement>> {
        let settlements = self.settlements.read().await;
        let mut found: Vec<Settlement> = settlements
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }
}
