//! The transactional key-value storage interface consumed by the core
//! (§4.D). The core never issues ad-hoc I/O; every mutating operation
//! composes inside a single transaction supplied by the caller, and the
//! store guarantees atomicity per transaction.

use thiserror::Error;

use protocol_types::{ExecutionResult, Header, Identifier, Payload, Seal, ServiceEvent};

/// Errors from the durable storage layer. Distinct from the core's
/// `NotFound`/`Storage` error classes: a `NotFound` here is translated by
/// the core into its own `NotFound` or `OutdatedExtension`, depending on
/// context, rather than being exposed verbatim.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found")]
    NotFound,
}

impl protocol_types::ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "storage.backend",
            Self::Encode(_) => "storage.encode",
            Self::Decode(_) => "storage.decode",
            Self::NotFound => "storage.not_found",
        }
    }
}

/// A single atomic unit of work against the store. Implementations hand
/// out `Txn` values bound to an underlying write (or read) transaction;
/// every `StateStore` method below takes one by reference so a caller can
/// batch many operations into one commit.
pub trait Txn {}

/// The operations enumerated by §4.D, implemented by a concrete storage
/// backend (see `protocol-storage`).
pub trait StateStore: Send + Sync {
    type Txn: Txn;

    /// Opens a new read-write transaction.
    fn begin(&self) -> Result<Self::Txn, StorageError>;
    /// Commits a transaction, making its writes durable and visible.
    fn commit(&self, txn: Self::Txn) -> Result<(), StorageError>;

    fn insert_header(&self, txn: &mut Self::Txn, header: &Header) -> Result<(), StorageError>;
    fn retrieve_header(
        &self,
        txn: &Self::Txn,
        id: Identifier,
    ) -> Result<Option<Header>, StorageError>;

    fn index_by_height(
        &self,
        txn: &mut Self::Txn,
        height: u64,
        id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_by_height(
        &self,
        txn: &Self::Txn,
        height: u64,
    ) -> Result<Option<Identifier>, StorageError>;

    fn insert_payload(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        payload: &Payload,
    ) -> Result<(), StorageError>;
    fn retrieve_payload(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Payload>, StorageError>;

    fn insert_seal(&self, txn: &mut Self::Txn, seal: &Seal) -> Result<(), StorageError>;
    /// The seal whose `BlockID` is this block, or `None` if the block has
    /// not itself been sealed.
    fn lookup_block_seal(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;
    fn retrieve_seal(
        &self,
        txn: &Self::Txn,
        seal_id: Identifier,
    ) -> Result<Option<Seal>, StorageError>;

    /// The highest seal reachable from `block_id` by walking its fork
    /// backward — i.e. the most recent seal known as of this block.
    /// Maintained as an index at extension time so the walk the extension
    /// validator would otherwise need is O(1) amortized (§5).
    fn index_fork_latest_seal(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        seal_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_fork_latest_seal(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;

    fn insert_execution_result(
        &self,
        txn: &mut Self::Txn,
        result: &ExecutionResult,
    ) -> Result<(), StorageError>;
    fn retrieve_execution_result(
        &self,
        txn: &Self::Txn,
        result_id: Identifier,
    ) -> Result<Option<ExecutionResult>, StorageError>;

    fn insert_service_event(
        &self,
        txn: &mut Self::Txn,
        event_id: Identifier,
        event: &ServiceEvent,
    ) -> Result<(), StorageError>;
    fn retrieve_service_event(
        &self,
        txn: &Self::Txn,
        event_id: Identifier,
    ) -> Result<Option<ServiceEvent>, StorageError>;

    fn retrieve_finalized_height(&self, txn: &Self::Txn) -> Result<u64, StorageError>;
    fn update_finalized_height(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError>;

    fn retrieve_sealed_height(&self, txn: &Self::Txn) -> Result<u64, StorageError>;
    fn update_sealed_height(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError>;

    /// Highest finalized height per chain (the finalized trunk boundary).
    fn retrieve_boundary(&self, txn: &Self::Txn) -> Result<u64, StorageError>;
    fn update_boundary(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError>;

    // --- Per-block epoch-transition indices (§4.H), assigned during
    // extension and immutable once persisted. ---
    fn index_epoch_counter(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        counter: u64,
    ) -> Result<(), StorageError>;
    fn lookup_epoch_counter(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<u64>, StorageError>;

    fn index_phase(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        phase: protocol_types::Phase,
    ) -> Result<(), StorageError>;
    fn lookup_phase(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<protocol_types::Phase>, StorageError>;

    fn index_next_epoch_setup(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_next_epoch_setup(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;

    fn index_next_epoch_commit(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_next_epoch_commit(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;

    // `current`/`previous` are indexed per block, not by counter: two
    // competing forks can each cross the same epoch boundary with a
    // distinct setup/commit for what is, numerically, the same next
    // counter, and a global by-counter table would let one fork's
    // transition clobber the other's.
    fn index_current_epoch_setup(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_current_epoch_setup(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;

    fn index_current_epoch_commit(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_current_epoch_commit(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;

    fn index_previous_epoch_setup(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_previous_epoch_setup(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;

    fn index_previous_epoch_commit(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError>;
    fn lookup_previous_epoch_commit(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError>;
}
