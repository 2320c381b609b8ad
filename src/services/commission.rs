//! Commission Engine - profit split and referral cascade
//!
//! One realized profit becomes:
//! - a platform fee credited to the platform account
//! - the trader's share credited to the trader
//! - a payout to every generation-1 and generation-2 inviter
//!
//! Posting is idempotent per trade id. If any posting fails, everything
//! already posted for that trade is compensated and the first error is
//! returned.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::ledger::WalletLedger;
use crate::config::{CommissionConfig, SettlementMode};
use crate::domain::{
    CommissionFilter, CommissionRecord, CommissionStatus, CommissionType, WalletUpdate,
};
use crate::error::{FinError, Result};
use crate::persistence::Store;
use crate::referral::ReferralGraph;

/// Result of processing one trade profit
#[derive(Debug, Clone, Serialize)]
pub struct CommissionOutcome {
    pub trade_id: String,
    pub platform_fee: Decimal,
    pub user_share: Decimal,
    /// Sum of all generation-1 and generation-2 payouts
    pub referral_total: Decimal,
    pub records: Vec<CommissionRecord>,
    /// The trade had already been processed; nothing was posted
    pub duplicate: bool,
}

impl CommissionOutcome {
    fn from_records(trade_id: &str, records: Vec<CommissionRecord>, duplicate: bool) -> Self {
        let mut platform_fee = Decimal::ZERO;
        let mut user_share = Decimal::ZERO;
        let mut referral_total = Decimal::ZERO;

        for record in &records {
            match (record.commission_type, record.generation) {
                (CommissionType::Platform, _) => platform_fee += record.amount,
                (CommissionType::Team, None) => user_share += record.amount,
                (CommissionType::Team, Some(_)) => referral_total += record.amount,
                (CommissionType::Withdrawal, _) => {}
            }
        }

        Self {
            trade_id: trade_id.to_string(),
            platform_fee,
            user_share,
            referral_total,
            records,
            duplicate,
        }
    }
}

pub struct CommissionEngine {
    store: Arc<dyn Store>,
    ledger: Arc<WalletLedger>,
    referrals: Arc<dyn ReferralGraph>,
    config: CommissionConfig,
    /// Trades currently being posted
    in_flight: Mutex<HashSet<String>>,
}

impl CommissionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<WalletLedger>,
        referrals: Arc<dyn ReferralGraph>,
        config: CommissionConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            referrals,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &CommissionConfig {
        &self.config
    }

    /// Split `profit` from `trade_id` and post every resulting commission.
    pub async fn process_trade_profit(
        &self,
        user_id: &str,
        strategy_id: &str,
        trade_id: &str,
        profit: Decimal,
    ) -> Result<CommissionOutcome> {
        if profit <= Decimal::ZERO {
            return Err(FinError::Validation(format!(
                "profit must be positive, got {profit}"
            )));
        }
        if trade_id.trim().is_empty() {
            return Err(FinError::Validation("trade_id is required".into()));
        }
        if user_id.trim().is_empty() {
            return Err(FinError::Validation("user_id is required".into()));
        }

        if !self.in_flight.lock().await.insert(trade_id.to_string()) {
            return Err(FinError::Validation(format!(
                "commission for trade {trade_id} is already being processed"
            )));
        }
        let result = self
            .process_exclusive(user_id, strategy_id, trade_id, profit)
            .await;
        self.in_flight.lock().await.remove(trade_id);

        result
    }

    async fn process_exclusive(
        &self,
        user_id: &str,
        strategy_id: &str,
        trade_id: &str,
        profit: Decimal,
    ) -> Result<CommissionOutcome> {
        // Failed records were fully reversed; they do not count as processed
        let existing: Vec<_> = self
            .store
            .find_commissions(&CommissionFilter::by_trade(trade_id))
            .await?
            .into_iter()
            .filter(|r| r.status != CommissionStatus::Failed)
            .collect();
        if !existing.is_empty() {
            info!(
                "Trade {} already has {} commission records, skipping",
                trade_id,
                existing.len()
            );
            return Ok(CommissionOutcome::from_records(trade_id, existing, true));
        }

        let first_gen = self.referrals.first_generation(user_id).await?;
        let second_gen = self.referrals.second_generation(user_id).await?;

        let plan = self.plan(user_id, strategy_id, trade_id, profit, &first_gen, &second_gen);
        let records = self.post_all(trade_id, plan).await?;
        let outcome = CommissionOutcome::from_records(trade_id, records, false);

        info!(
            "Trade {} profit {} split: platform {}, trader {} ({}), referrals {} ({} gen-1, {} gen-2)",
            trade_id,
            profit,
            outcome.platform_fee,
            outcome.user_share,
            user_id,
            outcome.referral_total,
            first_gen.len(),
            second_gen.len()
        );
        Ok(outcome)
    }

    fn plan(
        &self,
        user_id: &str,
        strategy_id: &str,
        trade_id: &str,
        profit: Decimal,
        first_gen: &[String],
        second_gen: &[String],
    ) -> Vec<CommissionRecord> {
        let platform_fee = profit * self.config.platform_fee_rate;
        let user_share = profit - platform_fee;
        let mut plan = Vec::with_capacity(2 + first_gen.len() + second_gen.len());

        if platform_fee > Decimal::ZERO {
            plan.push(
                CommissionRecord::new(
                    &self.config.platform_account,
                    CommissionType::Platform,
                    platform_fee,
                )
                .with_trade(strategy_id, trade_id)
                .with_source(user_id)
                .completed(),
            );
        }
        plan.push(
            CommissionRecord::new(user_id, CommissionType::Team, user_share)
                .with_trade(strategy_id, trade_id)
                .completed(),
        );

        let referral_payouts = first_gen
            .iter()
            .map(|r| (r, 1u8, self.config.first_gen_rate))
            .chain(second_gen.iter().map(|r| (r, 2u8, self.config.second_gen_rate)));
        for (referrer, generation, rate) in referral_payouts {
            let amount = profit * rate;
            if amount <= Decimal::ZERO {
                continue;
            }
            let record = CommissionRecord::new(referrer, CommissionType::Team, amount)
                .with_trade(strategy_id, trade_id)
                .with_source(user_id)
                .with_generation(generation);
            plan.push(match self.config.settlement_mode {
                SettlementMode::Immediate => record.completed(),
                SettlementMode::Deferred => record,
            });
        }

        plan
    }

    /// Post records in order; on the first failure compensate everything
    /// posted so far and return that failure.
    async fn post_all(
        &self,
        trade_id: &str,
        plan: Vec<CommissionRecord>,
    ) -> Result<Vec<CommissionRecord>> {
        let mut posted: Vec<(CommissionRecord, bool)> = Vec::with_capacity(plan.len());

        for record in plan {
            if let Err(e) = self.store.insert_commission(&record).await {
                self.compensate(trade_id, posted).await;
                return Err(e);
            }
            if record.status == CommissionStatus::Completed {
                if let Err(e) = self
                    .ledger
                    .update_wallet(&record.user_id, record.amount, WalletUpdate::BALANCE)
                    .await
                {
                    posted.push((record, false));
                    self.compensate(trade_id, posted).await;
                    return Err(e);
                }
                posted.push((record, true));
            } else {
                debug!(
                    "Deferred gen-{} commission {} for {}",
                    record.generation.unwrap_or_default(),
                    record.amount,
                    record.user_id
                );
                posted.push((record, false));
            }
        }

        Ok(posted.into_iter().map(|(record, _)| record).collect())
    }

    /// Reverse postings newest first. A record is only marked failed once
    /// its credit is gone; if the reversal fails it stays completed, so the
    /// trade keeps counting as processed and is never credited twice.
    async fn compensate(&self, trade_id: &str, posted: Vec<(CommissionRecord, bool)>) {
        warn!(
            "Compensating {} commission postings for trade {}",
            posted.len(),
            trade_id
        );

        let mut unreversed = 0;
        for (mut record, credited) in posted.into_iter().rev() {
            if credited {
                if let Err(e) = self.ledger.reverse_credit(&record.user_id, record.amount).await {
                    error!(
                        "Failed to reverse credit {} for {} (trade {}), record {} kept completed: {}",
                        record.amount, record.user_id, trade_id, record.id, e
                    );
                    unreversed += 1;
                    continue;
                }
            }
            record.mark_failed();
            if let Err(e) = self.store.update_commission(&record).await {
                error!(
                    "Failed to mark commission {} failed (trade {}): {}",
                    record.id, trade_id, e
                );
            }
        }

        if unreversed > 0 {
            error!(
                "Trade {} partially compensated: {} credits could not be reversed and need reconciliation",
                trade_id, unreversed
            );
        }
    }

    pub async fn get_user_commissions(&self, user_id: &str) -> Result<Vec<CommissionRecord>> {
        self.store
            .find_commissions(&CommissionFilter::by_user(user_id))
            .await
    }

    pub async fn get_trade_commissions(&self, trade_id: &str) -> Result<Vec<CommissionRecord>> {
        self.store
            .find_commissions(&CommissionFilter::by_trade(trade_id))
            .await
    }
}
