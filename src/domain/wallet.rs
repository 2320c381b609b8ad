use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FinError, Result};

/// Which bucket a ledger mutation touches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletUpdate {
    /// Apply the amount to `frozen_amount` instead of `balance`
    pub frozen: bool,
    /// Count |amount| towards `total_withdrawal`
    pub withdrawal: bool,
}

impl WalletUpdate {
    pub const BALANCE: WalletUpdate = WalletUpdate {
        frozen: false,
        withdrawal: false,
    };

    pub const FROZEN: WalletUpdate = WalletUpdate {
        frozen: true,
        withdrawal: false,
    };

    pub const FROZEN_WITHDRAWAL: WalletUpdate = WalletUpdate {
        frozen: true,
        withdrawal: true,
    };
}

/// Per-user monetary state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub balance: Decimal,
    pub frozen_amount: Decimal,
    pub total_commission: Decimal,
    pub total_withdrawal: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            frozen_amount: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            total_withdrawal: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Balance not reserved by pending withdrawals
    pub fn available(&self) -> Decimal {
        self.balance - self.frozen_amount
    }

    /// Apply one mutation. Rejects anything that would make a bucket negative,
    /// or a balance debit that would eat into frozen funds, and leaves the
    /// wallet untouched in that case.
    pub fn apply(&mut self, amount: Decimal, update: WalletUpdate) -> Result<()> {
        if update.frozen {
            let frozen = self.frozen_amount + amount;
            if frozen < Decimal::ZERO {
                return Err(self.insufficient(amount.abs(), self.frozen_amount));
            }
            self.frozen_amount = frozen;
        } else {
            let balance = self.balance + amount;
            if balance < Decimal::ZERO {
                return Err(self.insufficient(amount.abs(), self.balance));
            }
            if amount < Decimal::ZERO && balance < self.frozen_amount {
                return Err(self.insufficient(amount.abs(), self.available().max(Decimal::ZERO)));
            }
            self.balance = balance;
            if amount > Decimal::ZERO {
                self.total_commission += amount;
            }
        }

        if update.withdrawal {
            self.total_withdrawal += amount.abs();
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reserve `amount` of the available balance.
    pub fn reserve(&mut self, amount: Decimal) -> Result<()> {
        let available = self.available();
        if amount > available {
            return Err(self.insufficient(amount, available));
        }
        self.apply(amount, WalletUpdate::FROZEN)
    }

    /// Finalize a reserved withdrawal: the frozen amount is released and the
    /// balance debited in one step.
    pub fn settle_withdrawal(&mut self, amount: Decimal) -> Result<()> {
        if amount > self.frozen_amount {
            return Err(self.insufficient(amount, self.frozen_amount));
        }
        if amount > self.balance {
            return Err(self.insufficient(amount, self.balance));
        }
        self.apply(-amount, WalletUpdate::FROZEN_WITHDRAWAL)?;
        self.apply(-amount, WalletUpdate::BALANCE)
    }

    /// Undo an earlier credit, including its effect on `total_commission`.
    pub fn reverse_credit(&mut self, amount: Decimal) -> Result<()> {
        self.apply(-amount, WalletUpdate::BALANCE)?;
        self.total_commission -= amount;
        Ok(())
    }

    fn insufficient(&self, requested: Decimal, available: Decimal) -> FinError {
        FinError::InsufficientBalance {
            user_id: self.user_id.clone(),
            requested,
            available,
        }
    }
}
