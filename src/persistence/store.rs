use async_trait::async_trait;

use crate::domain::{
    CommissionFilter, CommissionRecord, Order, OrderStatus, Settlement, SettlementFilter, Wallet,
};
use crate::error::Result;

/// Storage port for every durable entity of the core.
///
/// Services issue logical reads and writes only; adapters decide how they
/// are stored. `update_*` fails with `NotFound` when the row does not exist.
#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Orders ====================

    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn update_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: &str) -> Result<Option<Order>>;

    async fn find_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;

    // ==================== Commission records ====================

    async fn insert_commission(&self, record: &CommissionRecord) -> Result<()>;

    async fn update_commission(&self, record: &CommissionRecord) -> Result<()>;

    async fn get_commission(&self, id: &str) -> Result<Option<CommissionRecord>>;

    async fn find_commissions(&self, filter: &CommissionFilter) -> Result<Vec<CommissionRecord>>;

    // ==================== Wallets ====================

    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>>;

    /// Insert or replace the wallet keyed by `user_id`
    async fn save_wallet(&self, wallet: &Wallet) -> Result<()>;

    // ==================== Settlements ====================

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<()>;

    async fn update_settlement(&self, settlement: &Settlement) -> Result<()>;

    async fn get_settlement(&self, id: &str) -> Result<Option<Settlement>>;

    async fn find_settlements(&self, filter: &SettlementFilter) -> Result<Vec<Settlement>>;
}
