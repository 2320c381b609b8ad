//! Order Platform - risk gate, order queue and execution engine
//!
//! Orders pass the risk gate, wait in a FIFO queue and are executed through
//! an exchange gateway with bounded, delayed retries.

mod engine;
mod queue;
mod risk;
mod scheduler;

pub use engine::{EngineStats, OrderEngine, OrderUpdate};
pub use queue::{OrderQueue, QueueStats};
pub use risk::{evaluate, RiskGate, RiskLimits, RiskViolation, TradeParams};
pub use scheduler::RetryScheduler;
