//! Risk Gate - pre-trade limit checks
//!
//! Validates trade parameters against a replaceable set of limits.
//! A limit that is not configured, or a parameter that is not supplied,
//! never causes a rejection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configurable limits; `None` disables the rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    #[serde(default)]
    pub max_leverage: Option<Decimal>,
    #[serde(default)]
    pub max_position_size: Option<Decimal>,
    #[serde(default)]
    pub max_drawdown: Option<Decimal>,
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,
}

impl RiskLimits {
    /// Configured limits as (rule name, value)
    pub fn configured(&self) -> Vec<(&'static str, Decimal)> {
        [
            ("max_leverage", self.max_leverage),
            ("max_position_size", self.max_position_size),
            ("max_drawdown", self.max_drawdown),
            ("max_daily_loss", self.max_daily_loss),
        ]
        .into_iter()
        .filter_map(|(name, limit)| limit.map(|l| (name, l)))
        .collect()
    }
}

/// Parameters of a proposed trade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeParams {
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default)]
    pub position_size: Option<Decimal>,
    #[serde(default)]
    pub drawdown: Option<Decimal>,
    #[serde(default)]
    pub daily_loss: Option<Decimal>,
}

/// The first rule a trade broke
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskViolation {
    pub rule: &'static str,
    pub value: Decimal,
    pub limit: Decimal,
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} exceeds limit {}", self.rule, self.value, self.limit)
    }
}

/// Check `params` against `limits`, in rule order, stopping at the first
/// violation.
pub fn evaluate(limits: &RiskLimits, params: &TradeParams) -> Option<RiskViolation> {
    let rules = [
        ("max_leverage", limits.max_leverage, params.leverage),
        (
            "max_position_size",
            limits.max_position_size,
            params.position_size,
        ),
        ("max_drawdown", limits.max_drawdown, params.drawdown),
        ("max_daily_loss", limits.max_daily_loss, params.daily_loss),
    ];

    rules.into_iter().find_map(|(rule, limit, value)| match (limit, value) {
        (Some(limit), Some(value)) if value > limit => Some(RiskViolation { rule, value, limit }),
        _ => None,
    })
}

/// Risk gate holding the active limits
pub struct RiskGate {
    limits: RwLock<RiskLimits>,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits: RwLock::new(limits),
        }
    }

    /// `true` if the trade may proceed
    pub async fn check_strategy_risk(&self, strategy_id: &str, params: &TradeParams) -> bool {
        self.violation(strategy_id, params).await.is_none()
    }

    /// Same check, returning the violated rule
    pub async fn violation(&self, strategy_id: &str, params: &TradeParams) -> Option<RiskViolation> {
        let limits = self.limits.read().await;
        match evaluate(&limits, params) {
            Some(violation) => {
                warn!(
                    strategy_id,
                    rule = violation.rule,
                    value = %violation.value,
                    limit = %violation.limit,
                    "Risk check failed: {}",
                    violation.rule
                );
                Some(violation)
            }
            None => {
                debug!(strategy_id, "Risk check passed");
                None
            }
        }
    }

    /// Replace the whole limit set (not a merge)
    pub async fn update_risk_limits(&self, new_limits: RiskLimits) {
        let mut limits = self.limits.write().await;
        info!("Risk limits updated: {:?} -> {:?}", *limits, new_limits);
        *limits = new_limits;
    }

    pub async fn risk_limits(&self) -> RiskLimits {
        self.limits.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(leverage: Decimal, position_size: Decimal) -> TradeParams {
        TradeParams {
            leverage: Some(leverage),
            position_size: Some(position_size),
            drawdown: Some(dec!(0.05)),
            daily_loss: Some(dec!(100)),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_limits_never_reject() {
        let gate = RiskGate::new(RiskLimits::default());
        assert!(
            gate.check_strategy_risk("s1", &params(dec!(100), dec!(1_000_000)))
                .await
        );
    }

    #[tokio::test]
    async fn test_configured_limit_rejects() {
        let gate = RiskGate::new(RiskLimits {
            max_leverage: Some(dec!(10)),
            ..Default::default()
        });

        assert!(gate.check_strategy_risk("s1", &params(dec!(10), dec!(5))).await);
        assert!(!gate.check_strategy_risk("s1", &params(dec!(11), dec!(5))).await);
    }

    #[tokio::test]
    async fn test_missing_param_never_rejects() {
        let gate = RiskGate::new(RiskLimits {
            max_daily_loss: Some(dec!(50)),
            ..Default::default()
        });
        assert!(gate.check_strategy_risk("s1", &TradeParams::default()).await);
    }

    #[test]
    fn test_first_violation_wins() {
        let limits = RiskLimits {
            max_leverage: Some(dec!(5)),
            max_position_size: Some(dec!(10)),
            max_drawdown: None,
            max_daily_loss: None,
        };
        let violation = evaluate(&limits, &params(dec!(20), dec!(50))).unwrap();
        assert_eq!(violation.rule, "max_leverage");

        let violation = evaluate(&limits, &params(dec!(2), dec!(50))).unwrap();
        assert_eq!(violation.rule, "max_position_size");
        assert_eq!(violation.to_string(), "max_position_size 50 exceeds limit 10");
    }

    #[tokio::test]
    async fn test_update_replaces_not_merges() {
        let gate = RiskGate::new(RiskLimits {
            max_leverage: Some(dec!(5)),
            ..Default::default()
        });
        gate.update_risk_limits(RiskLimits {
            max_position_size: Some(dec!(10)),
            ..Default::default()
        })
        .await;

        let limits = gate.risk_limits().await;
        assert_eq!(limits.max_leverage, None);
        assert_eq!(limits.max_position_size, Some(dec!(10)));

        // leverage no longer limited
        assert!(gate.check_strategy_risk("s1", &params(dec!(50), dec!(1))).await);
    }
}
