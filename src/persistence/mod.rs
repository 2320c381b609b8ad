//! Persistence port and in-memory adapter
//!
//! The PostgreSQL adapter lives in `adapters::postgres`.

pub mod memory;
pub mod store;

pub use memory::InMemoryStore;
pub use store::Store;
