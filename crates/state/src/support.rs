//! Ancestor-walking helpers shared by the extension validator and the
//! finalization driver.

use protocol_api::storage::StateStore;
use protocol_types::{Header, Identifier, Seal, ServiceEvent};

use crate::error::ProtocolError;

/// Deterministic id for a service event, scoped to the seal that carries
/// it. Distinguishes an `EpochSetup` from an `EpochCommit` sharing the
/// same counter so the two never collide in storage.
pub(crate) fn service_event_id(seal_id: Identifier, event: &ServiceEvent) -> Identifier {
    let mut enc = protocol_types::codec::Encoder::new();
    enc.encode_bytes(seal_id.as_bytes());
    enc.encode_u64(event.counter());
    enc.encode_u8(match event {
        ServiceEvent::EpochSetup { .. } => 0,
        ServiceEvent::EpochCommit { .. } => 1,
    });
    Identifier::from(protocol_types::hash::hash32(b"service_event", &enc.finish()))
}

/// Walks parent pointers from `from` back to (and including) `height`.
/// Assumes every visited ancestor is already persisted, which holds for
/// any header reachable from a previously-accepted block.
pub(crate) fn ancestor_at_height<S: StateStore>(
    store: &S,
    txn: &S::Txn,
    from: &Header,
    height: u64,
) -> Result<Header, ProtocolError> {
    let mut current = from.clone();
    while current.height > height {
        current = store
            .retrieve_header(txn, current.parent_id)?
            .ok_or(ProtocolError::NotFound)?;
    }
    Ok(current)
}

/// The seal sealing `block_id` itself, if one has been included on some
/// descendant's payload and indexed back to it.
pub(crate) fn seal_of_block<S: StateStore>(
    store: &S,
    txn: &S::Txn,
    block_id: Identifier,
) -> Result<Option<Seal>, ProtocolError> {
    match store.lookup_block_seal(txn, block_id)? {
        Some(seal_id) => Ok(store.retrieve_seal(txn, seal_id)?),
        None => Ok(None),
    }
}
