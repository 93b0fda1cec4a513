//! Closed error enumerations for the data model crate.
//!
//! Mirrors the umbrella-enum-of-closed-enums shape used throughout this
//! codebase: each concern owns one `thiserror` enum, and every variant
//! carries whatever data makes the failure actionable without string
//! matching.

use thiserror::Error;

/// Stable, machine-readable identifier for an error variant, independent of
/// the human-readable `Display` message. Used for log correlation and
/// metrics, never for control flow.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("duplicate node id in identity list")]
    DuplicateNodeID,
    #[error("duplicate address in identity list")]
    DuplicateAddress,
    #[error("identity has zero stake")]
    ZeroStake,
    #[error("collector assigned to more than one cluster")]
    DuplicateClusterMember,
    #[error("collector not assigned to any cluster")]
    UnassignedCollector,
}

impl ErrorCode for IdentityError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNodeID => "identity.duplicate_node_id",
            Self::DuplicateAddress => "identity.duplicate_address",
            Self::ZeroStake => "identity.zero_stake",
            Self::DuplicateClusterMember => "identity.duplicate_cluster_member",
            Self::UnassignedCollector => "identity.unassigned_collector",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("payload hash does not match header's payload hash field")]
    PayloadHashMismatch,
}

impl ErrorCode for BlockError {
    fn code(&self) -> &'static str {
        match self {
            Self::PayloadHashMismatch => "block.payload_hash_mismatch",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("input ended before the expected field could be read")]
    ShortInput,
    #[error("entity tag {0} is not a recognized encoded type")]
    UnknownEntityType(u8),
    #[error("encoded version {found} is newer than the {supported} this decoder supports")]
    VersionTooNew { found: u64, supported: u64 },
    #[error("trailing bytes left after decoding a complete value")]
    TrailingBytes,
    #[error("decoded bytes do not form a valid entity: {0}")]
    InvalidEntity(String),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::ShortInput => "codec.short_input",
            Self::UnknownEntityType(_) => "codec.unknown_entity_type",
            Self::VersionTooNew { .. } => "codec.version_too_new",
            Self::TrailingBytes => "codec.trailing_bytes",
            Self::InvalidEntity(_) => "codec.invalid_entity",
        }
    }
}
