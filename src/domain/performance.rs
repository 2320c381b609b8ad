use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strategy run state as seen by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceStatus {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for PerformanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PerformanceStatus::Running => "running",
            PerformanceStatus::Paused => "paused",
            PerformanceStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerformanceKey {
    pub strategy_id: String,
    pub user_id: String,
}

impl PerformanceKey {
    pub fn new(strategy_id: &str, user_id: &str) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

impl std::fmt::Display for PerformanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.strategy_id, self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    pub user_id: String,
    pub status: PerformanceStatus,
    pub start_time: DateTime<Utc>,
    pub current_return: Decimal,
    pub max_drawdown: Decimal,
    pub daily_return: Decimal,
    pub total_trades: u64,
    /// Fraction of winning trades in [0, 1]
    pub win_rate: Decimal,
    pub last_update: DateTime<Utc>,
}

impl StrategyPerformance {
    pub fn new(key: &PerformanceKey) -> Self {
        let now = Utc::now();
        Self {
            strategy_id: key.strategy_id.clone(),
            user_id: key.user_id.clone(),
            status: PerformanceStatus::Running,
            start_time: now,
            current_return: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            daily_return: Decimal::ZERO,
            total_trades: 0,
            win_rate: Decimal::ZERO,
            last_update: now,
        }
    }

    pub fn key(&self) -> PerformanceKey {
        PerformanceKey::new(&self.strategy_id, &self.user_id)
    }

    /// Merge the supplied fields; absent fields keep their value.
    pub fn merge(&mut self, update: &PerformanceUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(v) = update.current_return {
            self.current_return = v;
        }
        if let Some(v) = update.max_drawdown {
            self.max_drawdown = v;
        }
        if let Some(v) = update.daily_return {
            self.daily_return = v;
        }
        if let Some(v) = update.total_trades {
            self.total_trades = v;
        }
        if let Some(v) = update.win_rate {
            self.win_rate = v;
        }
        self.last_update = Utc::now();
    }

    /// Count one closed trade and fold it into the win rate.
    pub fn record_trade(&mut self, won: bool) {
        let wins = self.win_rate * Decimal::from(self.total_trades)
            + if won { Decimal::ONE } else { Decimal::ZERO };
        self.total_trades += 1;
        self.win_rate = wins / Decimal::from(self.total_trades);
        self.last_update = Utc::now();
    }
}

/// Partial update; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceUpdate {
    pub status: Option<PerformanceStatus>,
    pub current_return: Option<Decimal>,
    pub max_drawdown: Option<Decimal>,
    pub daily_return: Option<Decimal>,
    pub total_trades: Option<u64>,
    pub win_rate: Option<Decimal>,
}
