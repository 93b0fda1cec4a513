//! Storage backends implementing `protocol_api::storage::StateStore`.

pub mod mem_store;
pub mod redb_store;

pub use mem_store::{MemStateStore, MemTxn};
pub use redb_store::{RedbStateStore, RedbTxn};
