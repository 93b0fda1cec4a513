//! Finalization and sealing driver (§4.G). `finalize` advances the
//! finalized and sealed heights along one fork and fires consumer
//! callbacks in height order; `mark_valid` announces that a block's
//! parent is now safe to build on.

use protocol_api::consumer::ProtocolConsumer;
use protocol_api::storage::StateStore;
use protocol_types::{Header, Identifier, Phase};
use tracing::instrument;

use crate::error::{FinalizeViolation, ProtocolError};
use crate::support::ancestor_at_height;

fn invalid(v: FinalizeViolation) -> ProtocolError {
    ProtocolError::InvalidFinalize(v)
}

/// Collects the chain of headers from `block_id` down to (but excluding)
/// the currently finalized head, in ascending height order — the set that
/// becomes newly finalized by this call.
fn pending_chain<S: StateStore>(
    store: &S,
    txn: &S::Txn,
    block_id: Identifier,
) -> Result<Vec<Header>, ProtocolError> {
    let target = store
        .retrieve_header(txn, block_id)?
        .ok_or_else(|| invalid(FinalizeViolation::UnknownBlock))?;
    let finalized_height = store.retrieve_finalized_height(txn)?;
    if target.height < finalized_height {
        return Err(invalid(FinalizeViolation::NotDescendantOfFinalized));
    }
    if target.height == finalized_height {
        let canonical = store.lookup_by_height(txn, finalized_height)?;
        return if canonical == Some(block_id) {
            Ok(Vec::new())
        } else {
            Err(invalid(FinalizeViolation::NotDescendantOfFinalized))
        };
    }

    let mut chain = vec![target.clone()];
    let mut current = target;
    while current.height > finalized_height + 1 {
        current = store
            .retrieve_header(txn, current.parent_id)?
            .ok_or_else(|| invalid(FinalizeViolation::UnknownBlock))?;
        chain.push(current.clone());
    }
    // `current`'s parent must be exactly the finalized head, or this chain
    // is a fork that diverged before the finalized boundary.
    if finalized_height > 0 {
        let expected = ancestor_at_height(store, txn, &current, finalized_height)?;
        let canonical = store.lookup_by_height(txn, finalized_height)?;
        if Some(expected.id()) != canonical {
            return Err(invalid(FinalizeViolation::NotDescendantOfFinalized));
        }
    }
    chain.reverse();
    Ok(chain)
}

/// Advances the finalized (and, transitively, sealed) height up to and
/// including `block_id`, firing every consumer callback along the way.
/// Aborts with `ConsumerRejected` — and rolls back every pending write —
/// if any consumer returns an error.
#[instrument(skip(store, consumers))]
pub fn finalize<S: StateStore>(
    store: &S,
    consumers: &[std::sync::Arc<dyn ProtocolConsumer>],
    block_id: Identifier,
) -> Result<(), ProtocolError> {
    let mut txn = store.begin()?;
    let chain = pending_chain(store, &txn, block_id)?;
    if chain.is_empty() {
        return Ok(());
    }

    for header in &chain {
        let id = header.id();
        let parent_counter = store.lookup_epoch_counter(&txn, header.parent_id)?;
        let this_counter = store.lookup_epoch_counter(&txn, id)?.ok_or(ProtocolError::NotFound)?;
        let this_phase = store.lookup_phase(&txn, id)?.ok_or(ProtocolError::NotFound)?;

        store.update_finalized_height(&mut txn, header.height)?;
        store.index_by_height(&mut txn, header.height, id)?;

        let payload = store.retrieve_payload(&txn, id)?.ok_or(ProtocolError::NotFound)?;
        for seal in &payload.seals {
            let sealed_header = store
                .retrieve_header(&txn, seal.block_id)?
                .ok_or(ProtocolError::NotFound)?;
            let sealed_height = store.retrieve_sealed_height(&txn)?;
            if sealed_header.height > sealed_height {
                store.update_sealed_height(&mut txn, sealed_header.height)?;
            }
        }

        for consumer in consumers {
            consumer
                .block_finalized(header)
                .map_err(ProtocolError::ConsumerRejected)?;
        }

        if Some(this_counter) != parent_counter {
            store.update_boundary(&mut txn, header.height)?;
            for consumer in consumers {
                consumer
                    .epoch_transition(this_counter, header)
                    .map_err(ProtocolError::ConsumerRejected)?;
            }
        }
        match this_phase {
            Phase::Setup if parent_phase_is(store, &txn, header.parent_id, Phase::Staking)? => {
                for consumer in consumers {
                    consumer
                        .epoch_setup_phase_started(this_counter, header)
                        .map_err(ProtocolError::ConsumerRejected)?;
                }
            }
            Phase::Committed if parent_phase_is(store, &txn, header.parent_id, Phase::Setup)? => {
                for consumer in consumers {
                    consumer
                        .epoch_committed_phase_started(this_counter, header)
                        .map_err(ProtocolError::ConsumerRejected)?;
                }
            }
            _ => {}
        }
    }

    store.commit(txn)?;
    Ok(())
}

fn parent_phase_is<S: StateStore>(
    store: &S,
    txn: &S::Txn,
    parent_id: Identifier,
    phase: Phase,
) -> Result<bool, ProtocolError> {
    Ok(store.lookup_phase(txn, parent_id)?.map(|p| p == phase).unwrap_or(false))
}

/// Announces that `block_id`'s parent is now known to extend a valid
/// chain and is safe to build on. Never fired for the root block, which
/// has no parent to announce.
pub fn mark_valid<S: StateStore>(
    store: &S,
    consumers: &[std::sync::Arc<dyn ProtocolConsumer>],
    block_id: Identifier,
) -> Result<(), ProtocolError> {
    let txn = store.begin()?;
    let header = store
        .retrieve_header(&txn, block_id)?
        .ok_or_else(|| invalid(FinalizeViolation::UnknownBlock))?;
    if header.parent_id.is_zero() {
        return Ok(());
    }
    let parent = store
        .retrieve_header(&txn, header.parent_id)?
        .ok_or(ProtocolError::NotFound)?;
    for consumer in consumers {
        consumer.block_processable(&parent).map_err(ProtocolError::ConsumerRejected)?;
    }
    Ok(())
}
