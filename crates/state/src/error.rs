//! Closed error enumerations for the state machine (§7): one umbrella
//! enum over per-concern closed enums, so callers can match exhaustively
//! without string comparison. No panic or unchecked assertion escapes
//! this crate; every invariant violation is a named variant here.

use protocol_api::storage::StorageError;
use protocol_types::{BlockError, ErrorCode};
use thiserror::Error;

/// Permanent, block-level rejections (§4.F). The offending input is
/// discarded and never retried; no state mutation occurs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtensionViolation {
    #[error(transparent)]
    Structure(#[from] BlockError),
    #[error("parent block is not known to the store")]
    UnknownParent,
    #[error("candidate chain id does not match its parent's")]
    WrongChain,
    #[error("candidate height is not parent height + 1")]
    WrongHeight,
    #[error("candidate view does not exceed its parent's view")]
    NonMonotonicView,
    #[error("guaranteed collection is duplicated on this fork")]
    DuplicateGuarantee,
    #[error("seal chain is broken: previous state does not match the prior seal's final state")]
    SealChainBroken,
    #[error("service event observed out of the Staking -> Setup -> Committed order")]
    EpochEventOutOfOrder,
    #[error("fork crossed its epoch boundary without reaching Committed phase")]
    EpochFallback,
}

impl ErrorCode for ExtensionViolation {
    fn code(&self) -> &'static str {
        match self {
            Self::Structure(_) => "extend.payload_hash_mismatch",
            Self::UnknownParent => "extend.unknown_parent",
            Self::WrongChain => "extend.wrong_chain",
            Self::WrongHeight => "extend.wrong_height",
            Self::NonMonotonicView => "extend.non_monotonic_view",
            Self::DuplicateGuarantee => "extend.duplicate_guarantee",
            Self::SealChainBroken => "extend.seal_chain_broken",
            Self::EpochEventOutOfOrder => "extend.epoch_event_out_of_order",
            Self::EpochFallback => "extend.epoch_fallback",
        }
    }
}

/// Permanent rejections referring to pruned or abandoned history.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OutdatedKind {
    #[error("candidate's fork does not connect to the finalized trunk")]
    ForkBelowFinalized,
}

/// Rejections of a `finalize` call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeViolation {
    #[error("block is not a descendant of the current finalized head")]
    NotDescendantOfFinalized,
    #[error("block to finalize is unknown to the store")]
    UnknownBlock,
}

/// Rejections of a bootstrap attempt (§6). Storage is left untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootstrapViolation {
    #[error("root block height/parent/view are not self-consistent")]
    InconsistentRoot,
    #[error("root payload must not contain guarantees")]
    RootHasGuarantees,
    #[error("root block must carry exactly one self-seal")]
    WrongSealCount,
    #[error("root seal must carry exactly one EpochSetup and one EpochCommit for the initial counter")]
    IncompleteBootstrap,
    #[error(transparent)]
    Identity(#[from] protocol_types::IdentityError),
    #[error("EpochSetup.FinalView must exceed the root block's view")]
    FinalViewTooLow,
    #[error("bootstrap file could not be read or parsed: {0}")]
    BootstrapFile(String),
}

impl ErrorCode for BootstrapViolation {
    fn code(&self) -> &'static str {
        match self {
            Self::InconsistentRoot => "bootstrap.inconsistent_root",
            Self::RootHasGuarantees => "bootstrap.root_has_guarantees",
            Self::WrongSealCount => "bootstrap.wrong_seal_count",
            Self::IncompleteBootstrap => "bootstrap.incomplete",
            Self::Identity(_) => "bootstrap.identity",
            Self::FinalViewTooLow => "bootstrap.final_view_too_low",
            Self::BootstrapFile(_) => "bootstrap.file",
        }
    }
}

/// The closed error surface returned by every fallible core operation (§6, §7).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid extension: {0}")]
    InvalidExtension(ExtensionViolation),
    #[error("outdated extension: {0}")]
    OutdatedExtension(OutdatedKind),
    #[error("invalid finalize: {0}")]
    InvalidFinalize(FinalizeViolation),
    #[error("invalid bootstrap: {0}")]
    InvalidBootstrap(BootstrapViolation),
    #[error("not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("epoch not ready: phase has not reached Committed")]
    EpochNotReady,
    /// A registered consumer rejected an event; the whole `finalize` call
    /// fails and its transaction aborts (§4.G).
    #[error("consumer rejected event: {0}")]
    ConsumerRejected(String),
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidExtension(v) => v.code(),
            Self::OutdatedExtension(_) => "outdated_extension.fork_below_finalized",
            Self::InvalidFinalize(_) => "invalid_finalize",
            Self::InvalidBootstrap(v) => v.code(),
            Self::NotFound => "not_found",
            Self::Storage(_) => "storage",
            Self::EpochNotReady => "epoch_not_ready",
            Self::ConsumerRejected(_) => "consumer_rejected",
        }
    }
}
