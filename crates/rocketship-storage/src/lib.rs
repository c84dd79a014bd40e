// Run/test/log persistence: the RunStore trait plus its implementations.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::Database;
pub use store::{Result, RunStore, StoreError};
