pub mod commission;
pub mod ledger;
pub mod performance;
pub mod pipeline;
pub mod settlement;

pub use commission::{CommissionEngine, CommissionOutcome};
pub use ledger::WalletLedger;
pub use performance::PerformanceMonitor;
pub use pipeline::TradePipeline;
pub use settlement::SettlementService;
