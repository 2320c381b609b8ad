//! Settlement & Withdrawal Pipeline
//!
//! Withdrawals freeze funds on request and debit them on completion.
//! Pending platform/team commissions are batched into one settlement per
//! user by `process_pending_commissions`, which can run on an interval.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ledger::WalletLedger;
use crate::domain::{
    CommissionFilter, CommissionRecord, CommissionStatus, CommissionType, Settlement,
    SettlementFilter, SettlementStatus, SettlementSummary, SettlementType, WalletUpdate,
};
use crate::error::{FinError, Result};
use crate::persistence::Store;

pub struct SettlementService {
    store: Arc<dyn Store>,
    ledger: Arc<WalletLedger>,
    /// Serializes status changes of withdrawals and the batch job
    state_lock: Mutex<()>,
    running: Arc<AtomicBool>,
}

impl SettlementService {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<WalletLedger>) -> Self {
        Self {
            store,
            ledger,
            state_lock: Mutex::new(()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ==================== Withdrawals ====================

    /// Freeze `amount` and record a pending withdrawal.
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        amount: Decimal,
    ) -> Result<CommissionRecord> {
        if amount <= Decimal::ZERO {
            return Err(FinError::Validation(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }

        self.ledger.reserve(user_id, amount).await?;

        let record = CommissionRecord::withdrawal(user_id, amount);
        if let Err(e) = self.store.insert_commission(&record).await {
            if let Err(release_err) = self.ledger.release(user_id, amount).await {
                error!(
                    "Failed to release {} for {} after withdrawal insert failed: {}",
                    amount, user_id, release_err
                );
            }
            return Err(e);
        }

        info!(
            "Withdrawal {} requested by {} for {}",
            record.id, user_id, amount
        );
        Ok(record)
    }

    async fn pending_withdrawal(&self, record_id: &str) -> Result<CommissionRecord> {
        let record = self
            .store
            .get_commission(record_id)
            .await?
            .ok_or_else(|| FinError::not_found("commission", record_id))?;

        if record.commission_type != CommissionType::Withdrawal {
            return Err(FinError::Validation(format!(
                "record {record_id} is a {} commission, not a withdrawal",
                record.commission_type
            )));
        }
        Ok(record)
    }

    /// Debit a pending withdrawal and record a completed settlement for it.
    ///
    /// The record is marked completed before the debit, so a retry after a
    /// partial failure can never debit twice. A failed debit puts the record
    /// back to pending. Once the debit has happened the call succeeds even if
    /// the settlement row cannot be written.
    pub async fn complete_withdrawal(&self, record_id: &str) -> Result<CommissionRecord> {
        let _state = self.state_lock.lock().await;

        let mut record = self.pending_withdrawal(record_id).await?;
        record.mark_completed()?;
        let amount = record.amount.abs();

        self.store.update_commission(&record).await?;

        if let Err(e) = self.ledger.settle_withdrawal(&record.user_id, amount).await {
            record.revert_to_pending();
            if let Err(revert_err) = self.store.update_commission(&record).await {
                error!(
                    "Withdrawal {} left completed without a debit ({} still frozen for {}): {}",
                    record.id, amount, record.user_id, revert_err
                );
            }
            return Err(e);
        }

        let mut settlement = Settlement::new(
            &record.user_id,
            amount,
            SettlementType::Withdrawal,
            json!({ "commission_ids": [record.id] }),
        );
        let recorded = match settlement.transition(SettlementStatus::Completed) {
            Ok(()) => self.store.insert_settlement(&settlement).await,
            Err(e) => Err(e),
        };
        match recorded {
            Ok(()) => info!(
                "Withdrawal {} completed: {} paid out to {} (settlement {})",
                record.id, amount, record.user_id, settlement.id
            ),
            Err(e) => error!(
                "Withdrawal {} paid out {} to {} but its settlement was not recorded: {}",
                record.id, amount, record.user_id, e
            ),
        }
        Ok(record)
    }

    /// Fail a pending withdrawal and release its frozen funds.
    pub async fn fail_withdrawal(&self, record_id: &str, reason: &str) -> Result<CommissionRecord> {
        let _state = self.state_lock.lock().await;

        let mut record = self.pending_withdrawal(record_id).await?;
        if !record.is_pending() {
            return Err(FinError::transition(record.status, CommissionStatus::Failed));
        }

        // Persisted before the release; a failed release reverts it to pending
        record.mark_failed();
        self.store.update_commission(&record).await?;

        if let Err(e) = self.ledger.release(&record.user_id, record.amount.abs()).await {
            record.revert_to_pending();
            if let Err(revert_err) = self.store.update_commission(&record).await {
                error!(
                    "Withdrawal {} left failed with its funds still frozen: {}",
                    record.id, revert_err
                );
            }
            return Err(e);
        }

        warn!("Withdrawal {} failed: {}", record.id, reason);
        Ok(record)
    }

    // ==================== Settlements ====================

    pub async fn create_settlement(
        &self,
        user_id: &str,
        amount: Decimal,
        settlement_type: SettlementType,
        metadata: serde_json::Value,
    ) -> Result<Settlement> {
        if user_id.trim().is_empty() {
            return Err(FinError::Validation("user_id is required".into()));
        }
        if amount <= Decimal::ZERO {
            return Err(FinError::Validation(format!(
                "settlement amount must be positive, got {amount}"
            )));
        }

        let settlement = Settlement::new(user_id, amount, settlement_type, metadata);
        self.store.insert_settlement(&settlement).await?;
        debug!(
            "Created {} settlement {} for {}: {}",
            settlement_type, settlement.id, user_id, amount
        );
        Ok(settlement)
    }

    pub async fn update_settlement_status(
        &self,
        settlement_id: &str,
        status: SettlementStatus,
    ) -> Result<Settlement> {
        let _state = self.state_lock.lock().await;

        let mut settlement = self
            .store
            .get_settlement(settlement_id)
            .await?
            .ok_or_else(|| FinError::not_found("settlement", settlement_id))?;
        let previous = settlement.status;
        settlement.transition(status)?;
        self.store.update_settlement(&settlement).await?;

        info!("Settlement {} {} -> {}", settlement_id, previous, status);
        Ok(settlement)
    }

    pub async fn get_settlement(&self, settlement_id: &str) -> Result<Option<Settlement>> {
        self.store.get_settlement(settlement_id).await
    }

    pub async fn get_user_settlements(&self, user_id: &str) -> Result<Vec<Settlement>> {
        self.store
            .find_settlements(&SettlementFilter::by_user(user_id))
            .await
    }

    /// Count and amount per status; `from` and `to` both inclusive
    pub async fn get_settlement_summary(
        &self,
        user_id: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<SettlementSummary> {
        let settlements = self
            .store
            .find_settlements(&range_filter(user_id, from, to))
            .await?;
        Ok(SettlementSummary::from_settlements(&settlements))
    }

    // ==================== Batch job ====================

    /// Settle every pending platform/team record, one settlement per user.
    ///
    /// A failure for one user is logged and does not stop the batch.
    pub async fn process_pending_commissions(&self) -> Result<Vec<Settlement>> {
        let _state = self.state_lock.lock().await;

        let pending = self
            .store
            .find_commissions(&CommissionFilter::default().with_status(CommissionStatus::Pending))
            .await?;

        let mut by_user: BTreeMap<String, Vec<CommissionRecord>> = BTreeMap::new();
        for record in pending {
            if record.commission_type.is_settlement_eligible() {
                by_user.entry(record.user_id.clone()).or_default().push(record);
            }
        }

        if by_user.is_empty() {
            debug!("No pending commissions to settle");
            return Ok(Vec::new());
        }

        let mut settled = Vec::with_capacity(by_user.len());
        for (user_id, records) in by_user {
            match self.settle_user(&user_id, records).await {
                Ok(settlement) => settled.push(settlement),
                Err(e) => error!("Settlement for {} failed: {}", user_id, e),
            }
        }

        info!("Settlement batch settled {} users", settled.len());
        Ok(settled)
    }

    async fn settle_user(
        &self,
        user_id: &str,
        mut records: Vec<CommissionRecord>,
    ) -> Result<Settlement> {
        let total: Decimal = records.iter().map(|r| r.amount).sum();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();

        let mut settlement = Settlement::new(
            user_id,
            total,
            SettlementType::Commission,
            json!({ "commission_ids": ids, "period_end": Utc::now() }),
        );
        self.store.insert_settlement(&settlement).await?;

        let mut marked = 0;
        let mut failure = None;
        for record in records.iter_mut() {
            if let Err(e) = record.mark_completed() {
                failure = Some(e);
                break;
            }
            if let Err(e) = self.store.update_commission(record).await {
                failure = Some(e);
                break;
            }
            marked += 1;
        }

        if failure.is_none() {
            if let Err(e) = self
                .ledger
                .update_wallet(user_id, total, WalletUpdate::BALANCE)
                .await
            {
                failure = Some(e);
            }
        }

        if let Some(e) = failure {
            self.revert_batch(&mut settlement, &mut records[..marked]).await;
            return Err(e);
        }

        settlement.transition(SettlementStatus::Completed)?;
        self.store.update_settlement(&settlement).await?;

        info!(
            "Settled {} commissions for {}: {} (settlement {})",
            records.len(),
            user_id,
            total,
            settlement.id
        );
        Ok(settlement)
    }

    async fn revert_batch(&self, settlement: &mut Settlement, marked: &mut [CommissionRecord]) {
        for record in marked.iter_mut() {
            record.revert_to_pending();
            if let Err(e) = self.store.update_commission(record).await {
                error!("Failed to revert commission {} to pending: {}", record.id, e);
            }
        }

        if let Err(e) = settlement.transition(SettlementStatus::Failed) {
            error!("Settlement {} cannot be failed: {}", settlement.id, e);
            return;
        }
        if let Err(e) = self.store.update_settlement(settlement).await {
            error!("Failed to mark settlement {} failed: {}", settlement.id, e);
        }
    }

    /// Start the periodic batch loop. The first run happens after one
    /// `interval`.
    pub fn start_settlement_job(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Settlement job already running");
            return None;
        }

        let service = Arc::clone(self);
        let running = self.running.clone();
        info!("Starting settlement job (interval: {:?})", interval);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = service.process_pending_commissions().await {
                    error!("Settlement batch failed: {}", e);
                }
            }
            info!("Settlement job stopped");
        }))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // ==================== Export ====================

    /// CSV of settlements in the range, oldest first
    pub async fn export_settlements(
        &self,
        user_id: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let settlements = self
            .store
            .find_settlements(&range_filter(user_id, from, to))
            .await?;

        let mut csv = String::from("id,user_id,type,status,amount,created_at\n");
        for s in &settlements {
            let _ = writeln!(
                csv,
                "{},{},{},{},{},{}",
                csv_field(&s.id),
                csv_field(&s.user_id),
                s.settlement_type,
                s.status,
                s.amount.normalize(),
                s.created_at.to_rfc3339()
            );
        }

        debug!("Exported {} settlements", settlements.len());
        Ok(csv)
    }
}

fn range_filter(
    user_id: Option<&str>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> SettlementFilter {
    SettlementFilter {
        user_id: user_id.map(str::to_string),
        status: None,
        from,
        to,
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
