use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FinError, Result};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(FinError::Validation(format!("invalid order side '{other}'"))),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
        }
    }

    /// Limit and stop orders carry a trigger/limit price.
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Stop)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            other => Err(FinError::Validation(format!("invalid order type '{other}'"))),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted, waiting for its first execution attempt
    Pending,
    /// Last attempt failed, a retry is scheduled
    Retrying,
    /// Executed by the exchange
    Completed,
    /// Retries exhausted
    Failed,
    /// Cancelled before completion
    Cancelled,
    /// Lookup sentinel for ids the engine has never seen. Never stored.
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Retrying => "retrying",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Retrying)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Retrying)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Retrying, Retrying)
                | (Retrying, Completed)
                | (Retrying, Failed)
                | (Retrying, Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = FinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(OrderStatus::Pending),
            "retrying" => Ok(OrderStatus::Retrying),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(FinError::Validation(format!("invalid order status '{other}'"))),
        }
    }
}

/// Order request (what the caller wants executed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: String,
    pub strategy_id: String,
    pub exchange: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl NewOrder {
    pub fn market(
        user_id: &str,
        strategy_id: &str,
        exchange: &str,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            strategy_id: strategy_id.to_string(),
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            side,
            amount,
            price: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.user_id.trim().is_empty() {
            errors.push("user_id is required".to_string());
        }
        if self.strategy_id.trim().is_empty() {
            errors.push("strategy_id is required".to_string());
        }
        if self.exchange.trim().is_empty() {
            errors.push("exchange is required".to_string());
        }
        if self.symbol.trim().is_empty() {
            errors.push("symbol is required".to_string());
        }
        if self.amount <= Decimal::ZERO {
            errors.push(format!("amount must be positive, got {}", self.amount));
        }
        match (self.order_type.requires_price(), self.price) {
            (true, None) => errors.push(format!("{} order requires a price", self.order_type)),
            (_, Some(price)) if price <= Decimal::ZERO => {
                errors.push(format!("price must be positive, got {price}"))
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FinError::Validation(errors.join("; ")))
        }
    }
}

/// Order (tracked in our system)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub strategy_id: String,
    pub exchange: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub retry_count: u32,
    pub status: OrderStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id,
            strategy_id: request.strategy_id,
            exchange: request.exchange,
            symbol: request.symbol,
            order_type: request.order_type,
            side: request.side,
            amount: request.amount,
            price: request.price,
            retry_count: 0,
            status: OrderStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing anything that leaves a terminal status.
    pub fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(FinError::transition(self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Notional value at the order price, if the order has one.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_order() -> Order {
        Order::from_request(NewOrder::market(
            "u1",
            "s1",
            "binance",
            "BTCUSDT",
            OrderSide::Buy,
            dec!(0.5),
        ))
    }

    #[test]
    fn test_new_order_starts_pending() {
        let order = market_order();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.retry_count, 0);
        assert!(!order.id.is_empty());
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        for terminal in [
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            let mut order = market_order();
            order.status = terminal;
            for next in [
                OrderStatus::Pending,
                OrderStatus::Retrying,
                OrderStatus::Completed,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
            ] {
                assert!(order.transition(next).is_err(), "{terminal} -> {next}");
            }
            assert_eq!(order.status, terminal);
        }
    }

    #[test]
    fn test_retry_path() {
        let mut order = market_order();
        order.transition(OrderStatus::Retrying).unwrap();
        order.transition(OrderStatus::Retrying).unwrap();
        order.transition(OrderStatus::Completed).unwrap();
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_validation() {
        let mut request =
            NewOrder::market("u1", "s1", "binance", "BTCUSDT", OrderSide::Sell, dec!(1));
        assert!(request.validate().is_ok());

        request.amount = dec!(0);
        assert!(request.validate().is_err());

        request.amount = dec!(1);
        request.order_type = OrderType::Limit;
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("requires a price"));

        request.price = Some(dec!(65000));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_parse_closed_enums() {
        assert_eq!("BUY".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("stop".parse::<OrderType>().unwrap(), OrderType::Stop);
        assert!("hold".parse::<OrderSide>().is_err());
        assert!("iceberg".parse::<OrderType>().is_err());
    }
}
