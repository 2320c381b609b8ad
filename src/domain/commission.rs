use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FinError, Result};

/// Commission record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionType {
    /// Platform fee taken from a trade profit
    Platform,
    /// Trader share or referral payout
    Team,
    /// Pending debit against a wallet
    Withdrawal,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::Platform => "platform",
            CommissionType::Team => "team",
            CommissionType::Withdrawal => "withdrawal",
        }
    }

    /// Types the settlement batch job may aggregate.
    pub fn is_settlement_eligible(&self) -> bool {
        matches!(self, CommissionType::Platform | CommissionType::Team)
    }
}

impl std::fmt::Display for CommissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CommissionType {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "platform" => Ok(CommissionType::Platform),
            "team" => Ok(CommissionType::Team),
            "withdrawal" => Ok(CommissionType::Withdrawal),
            other => Err(FinError::Validation(format!(
                "invalid commission type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Completed,
    Failed,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Completed => "completed",
            CommissionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CommissionStatus {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(CommissionStatus::Pending),
            "completed" => Ok(CommissionStatus::Completed),
            "failed" => Ok(CommissionStatus::Failed),
            other => Err(FinError::Validation(format!(
                "invalid commission status '{other}'"
            ))),
        }
    }
}

/// A single posting produced by a profit event or a withdrawal.
///
/// Only `status` and `completed_at` change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: String,
    pub user_id: String,
    pub commission_type: CommissionType,
    /// Positive = credit, negative = pending debit
    pub amount: Decimal,
    pub source_user_id: Option<String>,
    /// Referral depth (1 or 2) for cascade payouts
    pub generation: Option<u8>,
    pub strategy_id: Option<String>,
    pub trade_id: Option<String>,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommissionRecord {
    pub fn new(user_id: &str, commission_type: CommissionType, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            commission_type,
            amount,
            source_user_id: None,
            generation: None,
            strategy_id: None,
            trade_id: None,
            status: CommissionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn withdrawal(user_id: &str, amount: Decimal) -> Self {
        Self::new(user_id, CommissionType::Withdrawal, -amount.abs())
    }

    pub fn with_trade(mut self, strategy_id: &str, trade_id: &str) -> Self {
        self.strategy_id = Some(strategy_id.to_string());
        self.trade_id = Some(trade_id.to_string());
        self
    }

    pub fn with_source(mut self, source_user_id: &str) -> Self {
        self.source_user_id = Some(source_user_id.to_string());
        self
    }

    pub fn with_generation(mut self, generation: u8) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn completed(mut self) -> Self {
        self.status = CommissionStatus::Completed;
        self.completed_at = Some(self.created_at);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == CommissionStatus::Pending
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        if self.status != CommissionStatus::Pending {
            return Err(FinError::transition(self.status, CommissionStatus::Completed));
        }
        self.status = CommissionStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Undo `mark_completed` when the step it guarded did not happen.
    pub fn revert_to_pending(&mut self) {
        self.status = CommissionStatus::Pending;
        self.completed_at = None;
    }

    pub fn mark_failed(&mut self) {
        self.status = CommissionStatus::Failed;
        self.completed_at = None;
    }
}

/// Find-by-filter criteria for commission records
#[derive(Debug, Clone, Default)]
pub struct CommissionFilter {
    pub user_id: Option<String>,
    pub trade_id: Option<String>,
    pub commission_type: Option<CommissionType>,
    pub status: Option<CommissionStatus>,
}

impl CommissionFilter {
    pub fn by_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn by_trade(trade_id: &str) -> Self {
        Self {
            trade_id: Some(trade_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CommissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &CommissionRecord) -> bool {
        self.user_id.as_deref().map_or(true, |u| record.user_id == u)
            && self
                .trade_id
                .as_deref()
                .map_or(true, |t| record.trade_id.as_deref() == Some(t))
            && self
                .commission_type
                .map_or(true, |t| record.commission_type == t)
            && self.status.map_or(true, |s| record.status == s)
    }
}
