use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, instrument};

use crate::domain::{
    CommissionFilter, CommissionRecord, Order, OrderStatus, Settlement, SettlementFilter, Wallet,
};
use crate::error::{FinError, Result};
use crate::persistence::Store;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn expect_updated(rows: u64, entity: &'static str, id: &str) -> Result<()> {
    if rows == 0 {
        Err(FinError::not_found(entity, id))
    } else {
        Ok(())
    }
}

fn order_from_row(r: &PgRow) -> Result<Order> {
    Ok(Order {
        id: r.get("id"),
        user_id: r.get("user_id"),
        strategy_id: r.get("strategy_id"),
        exchange: r.get("exchange"),
        symbol: r.get("symbol"),
        order_type: r.get::<String, _>("order_type").parse()?,
        side: r.get::<String, _>("side").parse()?,
        amount: r.get("amount"),
        price: r.get("price"),
        retry_count: r.get::<i32, _>("retry_count") as u32,
        status: r.get::<String, _>("status").parse()?,
        last_error: r.get("last_error"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn commission_from_row(r: &PgRow) -> Result<CommissionRecord> {
    Ok(CommissionRecord {
        id: r.get("id"),
        user_id: r.get("user_id"),
        commission_type: r.get::<String, _>("commission_type").parse()?,
        amount: r.get("amount"),
        source_user_id: r.get("source_user_id"),
        generation: r.get::<Option<i16>, _>("generation").map(|g| g as u8),
        strategy_id: r.get("strategy_id"),
        trade_id: r.get("trade_id"),
        status: r.get::<String, _>("status").parse()?,
        created_at: r.get("created_at"),
        completed_at: r.get("completed_at"),
    })
}

fn wallet_from_row(r: &PgRow) -> Wallet {
    Wallet {
        user_id: r.get("user_id"),
        balance: r.get("balance"),
        frozen_amount: r.get("frozen_amount"),
        total_commission: r.get("total_commission"),
        total_withdrawal: r.get("total_withdrawal"),
        updated_at: r.get("updated_at"),
    }
}

fn settlement_from_row(r: &PgRow) -> Result<Settlement> {
    Ok(Settlement {
        id: r.get("id"),
        user_id: r.get("user_id"),
        amount: r.get("amount"),
        settlement_type: r.get::<String, _>("settlement_type").parse()?,
        status: r.get::<String, _>("status").parse()?,
        metadata: r.get("metadata"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

#[async_trait]
impl Store for PostgresStore {
    // ==================== Orders ====================

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, strategy_id, exchange, symbol, order_type, side, amount, price,
                retry_count, status, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.strategy_id)
        .bind(&order.exchange)
        .bind(&order.symbol)
        .bind(order.order_type.as_str())
        .bind(order.side.as_str())
        .bind(order.amount)
        .bind(order.price)
        .bind(order.retry_count as i32)
        .bind(order.status.as_str())
        .bind(&order.last_error)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn update_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET retry_count = $2, status = $3, last_error = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(&order.id)
        .bind(order.retry_count as i32)
        .bind(order.status.as_str())
        .bind(&order.last_error)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        expect_updated(result.rows_affected(), "order", &order.id)
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    // ==================== Commission records ====================

    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn insert_commission(&self, record: &CommissionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO commission_records (
                id, user_id, commission_type, amount, source_user_id, generation,
                strategy_id, trade_id, status, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.commission_type.as_str())
        .bind(record.amount)
        .bind(&record.source_user_id)
        .bind(record.generation.map(|g| g as i16))
        .bind(&record.strategy_id)
        .bind(&record.trade_id)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn update_commission(&self, record: &CommissionRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE commission_records SET status = $2, completed_at = $3 WHERE id = $1",
        )
        .bind(&record.id)
        .bind(record.status.as_str())
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        expect_updated(result.rows_affected(), "commission record", &record.id)
    }

    async fn get_commission(&self, id: &str) -> Result<Option<CommissionRecord>> {
        let row = sqlx::query("SELECT * FROM commission_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(commission_from_row).transpose()
    }

    async fn find_commissions(&self, filter: &CommissionFilter) -> Result<Vec<CommissionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM commission_records
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR trade_id = $2)
              AND ($3::TEXT IS NULL OR commission_type = $3)
              AND ($4::TEXT IS NULL OR status = $4)
            ORDER BY created_at
            "#,
        )
        .bind(&filter.user_id)
        .bind(&filter.trade_id)
        .bind(filter.commission_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(commission_from_row).collect()
    }

    // ==================== Wallets ====================

    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(wallet_from_row))
    }

    #[instrument(skip(self, wallet), fields(user_id = %wallet.user_id))]
    async fn save_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (
                user_id, balance, frozen_amount, total_commission, total_withdrawal, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                balance = EXCLUDED.balance,
                frozen_amount = EXCLUDED.frozen_amount,
                total_commission = EXCLUDED.total_commission,
                total_withdrawal = EXCLUDED.total_withdrawal,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.frozen_amount)
        .bind(wallet.total_commission)
        .bind(wallet.total_withdrawal)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Settlements ====================

    #[instrument(skip(self, settlement), fields(settlement_id = %settlement.id))]
    async fn insert_settlement(&self, settlement: &Settlement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, user_id, amount, settlement_type, status, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&settlement.id)
        .bind(&settlement.user_id)
        .bind(settlement.amount)
        .bind(settlement.settlement_type.as_str())
        .bind(settlement.status.as_str())
        .bind(&settlement.metadata)
        .bind(settlement.created_at)
        .bind(settlement.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, settlement), fields(settlement_id = %settlement.id))]
    async fn update_settlement(&self, settlement: &Settlement) -> Result<()> {
        let result = sqlx::query(
            "UPDATE settlements SET status = $2, metadata = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(&settlement.id)
        .bind(settlement.status.as_str())
        .bind(&settlement.metadata)
        .bind(settlement.updated_at)
        .execute(&self.pool)
        .await?;

        expect_updated(result.rows_affected(), "settlement", &settlement.id)
    }

    async fn get_settlement(&self, id: &str) -> Result<Option<Settlement>> {
        let row = sqlx::query("SELECT * FROM settlements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn find_settlements(&self, filter: &SettlementFilter) -> Result<Vec<Settlement>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM settlements
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at <= $4)
            ORDER BY created_at
            "#,
        )
        .bind(&filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(settlement_from_row).collect()
    }
}
