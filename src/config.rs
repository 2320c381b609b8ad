use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::platform::RiskLimits;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub commission: CommissionConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Absent = in-memory store
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum retry attempts after the first failed execution
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay before a failed order is re-executed
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum number of orders waiting for their first attempt
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_queue_size() -> usize {
    1000
}

impl ExecutionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            queue_size: default_queue_size(),
        }
    }
}

/// When referral payouts reach the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Every posting is completed and credited right away
    #[default]
    Immediate,
    /// Referral postings stay pending until the settlement batch runs
    Deferred,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommissionConfig {
    /// Share of each profit kept by the platform (e.g., 0.10 = 10%)
    #[serde(default = "default_platform_fee_rate")]
    pub platform_fee_rate: Decimal,
    /// Payout to each direct inviter, as a share of the profit
    #[serde(default = "default_first_gen_rate")]
    pub first_gen_rate: Decimal,
    /// Payout to each inviter's inviter, as a share of the profit
    #[serde(default = "default_second_gen_rate")]
    pub second_gen_rate: Decimal,
    /// Wallet credited with platform fees
    #[serde(default = "default_platform_account")]
    pub platform_account: String,
    #[serde(default)]
    pub settlement_mode: SettlementMode,
}

fn default_platform_fee_rate() -> Decimal {
    dec!(0.10)
}

fn default_first_gen_rate() -> Decimal {
    dec!(0.20)
}

fn default_second_gen_rate() -> Decimal {
    dec!(0.10)
}

fn default_platform_account() -> String {
    "platform".to_string()
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            platform_fee_rate: default_platform_fee_rate(),
            first_gen_rate: default_first_gen_rate(),
            second_gen_rate: default_second_gen_rate(),
            platform_account: default_platform_account(),
            settlement_mode: SettlementMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Interval of the pending-commission batch job (seconds)
    #[serde(default = "default_batch_interval_secs")]
    pub batch_interval_secs: u64,
}

fn default_batch_interval_secs() -> u64 {
    3600
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            batch_interval_secs: default_batch_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Send a warning when a strategy's drawdown exceeds this (e.g., 0.2 = 20%)
    #[serde(default)]
    pub drawdown_alert_threshold: Option<Decimal>,
    /// Buffered snapshots per subscriber channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            drawdown_alert_threshold: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Webhook receiving alert text (optional)
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Minimum interval between duplicate alerts (seconds)
    #[serde(default = "default_rate_limit_secs")]
    pub rate_limit_secs: u64,
    /// Maximum notifications per minute
    #[serde(default = "default_max_alerts_per_minute")]
    pub max_alerts_per_minute: u32,
}

fn default_rate_limit_secs() -> u64 {
    60
}

fn default_max_alerts_per_minute() -> u32 {
    10
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            rate_limit_secs: default_rate_limit_secs(),
            max_alerts_per_minute: default_max_alerts_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("execution.max_retries", 3)?
            .set_default("execution.retry_delay_ms", 5000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FINCORE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FINCORE_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("FINCORE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let c = &self.commission;
        for (name, rate) in [
            ("platform_fee_rate", c.platform_fee_rate),
            ("first_gen_rate", c.first_gen_rate),
            ("second_gen_rate", c.second_gen_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                errors.push(format!("commission.{name} must be between 0 and 1, got {rate}"));
            }
        }
        if c.platform_fee_rate >= Decimal::ONE {
            errors.push("commission.platform_fee_rate must leave the trader a share".to_string());
        }
        if c.platform_account.trim().is_empty() {
            errors.push("commission.platform_account must not be empty".to_string());
        }

        if self.execution.queue_size == 0 {
            errors.push("execution.queue_size must be positive".to_string());
        }

        for (name, limit) in self.risk.configured() {
            if limit <= Decimal::ZERO {
                errors.push(format!("risk.{name} must be positive, got {limit}"));
            }
        }

        if self.settlement.batch_interval_secs == 0 {
            errors.push("settlement.batch_interval_secs must be positive".to_string());
        }

        if self.monitor.channel_capacity == 0 {
            errors.push("monitor.channel_capacity must be positive".to_string());
        }

        if let Some(db) = &self.database {
            if db.url.trim().is_empty() {
                errors.push("database.url must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
