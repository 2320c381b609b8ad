pub mod adapters;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod platform;
pub mod referral;
pub mod services;
pub mod supervisor;

pub use bootstrap::CoreServices;
pub use config::AppConfig;
pub use error::{FinError, Result};
pub use persistence::{InMemoryStore, Store};
pub use platform::{OrderEngine, RiskGate, RiskLimits, TradeParams};
pub use referral::{InMemoryReferralGraph, ReferralGraph};
pub use services::{
    CommissionEngine, CommissionOutcome, PerformanceMonitor, SettlementService, TradePipeline,
    WalletLedger,
};
pub use supervisor::{Alert, AlertLevel, AlertManager, AlertSink};
