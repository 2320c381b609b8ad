pub mod commission;
pub mod order;
pub mod performance;
pub mod settlement;
pub mod wallet;

pub use commission::*;
pub use order::*;
pub use performance::*;
pub use settlement::*;
pub use wallet::*;
