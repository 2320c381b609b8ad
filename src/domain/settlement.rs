use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementType {
    /// Aggregated commission payout
    Commission,
    /// Finalized withdrawal
    Withdrawal,
}

impl SettlementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementType::Commission => "commission",
            SettlementType::Withdrawal => "withdrawal",
        }
    }
}

impl std::fmt::Display for SettlementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SettlementType {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "commission" => Ok(SettlementType::Commission),
            "withdrawal" => Ok(SettlementType::Withdrawal),
            other => Err(FinError::Validation(format!(
                "invalid settlement type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Completed | SettlementStatus::Failed)
    }

    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(SettlementStatus::Pending),
            "processing" => Ok(SettlementStatus::Processing),
            "completed" => Ok(SettlementStatus::Completed),
            "failed" => Ok(SettlementStatus::Failed),
            other => Err(FinError::Validation(format!(
                "invalid settlement status '{other}'"
            ))),
        }
    }
}

/// Aggregated, status-tracked payout unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub settlement_type: SettlementType,
    pub status: SettlementStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    pub fn new(
        user_id: &str,
        amount: Decimal,
        settlement_type: SettlementType,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            settlement_type,
            status: SettlementStatus::Pending,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: SettlementStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(FinError::transition(self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettlementFilter {
    pub user_id: Option<String>,
    pub status: Option<SettlementStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SettlementFilter {
    pub fn by_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    /// Both bounds inclusive
    pub fn matches(&self, settlement: &Settlement) -> bool {
        self.user_id
            .as_deref()
            .map_or(true, |u| settlement.user_id == u)
            && self.status.map_or(true, |s| settlement.status == s)
            && self.from.map_or(true, |from| settlement.created_at >= from)
            && self.to.map_or(true, |to| settlement.created_at <= to)
    }
}

/// Count and amount for one settlement status
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusTotal {
    pub count: u64,
    pub amount: Decimal,
}

impl StatusTotal {
    fn add(&mut self, amount: Decimal) {
        self.count += 1;
        self.amount += amount;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettlementSummary {
    pub total: StatusTotal,
    pub pending: StatusTotal,
    pub processing: StatusTotal,
    pub completed: StatusTotal,
    pub failed: StatusTotal,
}

impl SettlementSummary {
    pub fn from_settlements<'a>(settlements: impl IntoIterator<Item = &'a Settlement>) -> Self {
        let mut summary = Self::default();
        for settlement in settlements {
            summary.total.add(settlement.amount);
            let bucket = match settlement.status {
                SettlementStatus::Pending => &mut summary.pending,
                SettlementStatus::Processing => &mut summary.processing,
                SettlementStatus::Completed => &mut summary.completed,
                SettlementStatus::Failed => &mut summary.failed,
            };
            bucket.add(settlement.amount);
        }
        summary
    }
}
