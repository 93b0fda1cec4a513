//! The extension validator — the safety kernel (§4.F). Runs the ordered
//! checks against a candidate block in one transaction, failing on the
//! first violation. Nothing is persisted unless every check passes.

use protocol_api::storage::StateStore;
use protocol_types::{Block, Identifier, Phase, ServiceEvent};
use tracing::{instrument, warn};

use crate::error::{ExtensionViolation, OutdatedKind, ProtocolError};
use crate::support::{ancestor_at_height, service_event_id};

/// Minimum length required of `EpochSetup::random_source`. Chosen to
/// match `Identifier`'s width so a random source can double as a seed
/// without truncation; the field is otherwise opaque to this validator.
const RANDOM_SOURCE_MIN_LEN: usize = 16;

fn invalid(v: ExtensionViolation) -> ProtocolError {
    ProtocolError::InvalidExtension(v)
}

/// Runs `candidate` through every check in §4.F, persisting it and its
/// fork-local indices only if all checks pass.
#[instrument(skip_all, fields(height = candidate.header.height, view = candidate.header.view))]
pub fn extend<S: StateStore>(store: &S, candidate: &Block) -> Result<(), ProtocolError> {
    let mut txn = store.begin()?;

    // 1. Structure
    candidate.valid_structure().map_err(|e| invalid(ExtensionViolation::Structure(e)))?;

    // 2. Parent exists
    let parent = store
        .retrieve_header(&txn, candidate.header.parent_id)?
        .ok_or_else(|| invalid(ExtensionViolation::UnknownParent))?;

    // 3. Chain ID
    if candidate.header.chain_id != parent.chain_id {
        return Err(invalid(ExtensionViolation::WrongChain));
    }

    // 4. Height
    if candidate.header.height != parent.height + 1 {
        return Err(invalid(ExtensionViolation::WrongHeight));
    }

    // 5. View
    if candidate.header.view <= parent.view {
        return Err(invalid(ExtensionViolation::NonMonotonicView));
    }

    // 6. Connects to finalized trunk: walk back to the finalized height (or
    // to the parent itself, if the parent is already below it) and confirm
    // that ancestor is the one finalize() actually chose at that height.
    let finalized_height = store.retrieve_finalized_height(&txn)?;
    if finalized_height > 0 {
        let check_height = finalized_height.min(parent.height);
        let ancestor = ancestor_at_height(store, &txn, &parent, check_height)?;
        let finalized_at_that_height = store.lookup_by_height(&txn, ancestor.height)?;
        if Some(ancestor.id()) != finalized_at_that_height {
            warn!(target: "protocol_state", "candidate fork does not connect to finalized trunk");
            return Err(ProtocolError::OutdatedExtension(OutdatedKind::ForkBelowFinalized));
        }
    }

    // 7. Guarantees: reference must resolve, no duplicate guarantee within
    // this block. Fork-wide guarantee deduplication and reference-block
    // validity are collection-cluster business logic this core does not
    // own (§1 Non-goals); this check only enforces the structural
    // invariants the core itself can see.
    {
        let mut seen = std::collections::BTreeSet::new();
        for guarantee in &candidate.payload.guarantees {
            if !seen.insert(guarantee.collection_id) {
                return Err(invalid(ExtensionViolation::DuplicateGuarantee));
            }
            if store.retrieve_header(&txn, guarantee.reference_block_id)?.is_none() {
                return Err(invalid(ExtensionViolation::DuplicateGuarantee));
            }
        }
    }

    // 8. Seal chain: each seal must both chain state commitments from the
    // prior seal and actually be sealing the next unsealed ancestor of
    // this candidate on its own fork — a seal whose commitments happen to
    // chain but whose `block_id` names a block on a different fork (or an
    // arbitrary identifier) is not a valid extension of the seal chain.
    let latest_seal_id_before = store.lookup_fork_latest_seal(&txn, parent.id())?;
    let (mut prev_final_state, last_sealed_height) = match latest_seal_id_before {
        Some(seal_id) => {
            let seal = store.retrieve_seal(&txn, seal_id)?.ok_or(ProtocolError::NotFound)?;
            // The root's self-seal carries `Identifier::ZERO` as its own
            // `block_id` (the root's real id can't appear inside its own
            // payload), which doesn't resolve through `retrieve_header`.
            let height = if seal.block_id.is_zero() {
                0
            } else {
                store.retrieve_header(&txn, seal.block_id)?.ok_or(ProtocolError::NotFound)?.height
            };
            (seal.final_state, height)
        }
        None => (protocol_types::StateCommitment([0u8; 32]), 0),
    };
    let mut latest_seal_id = latest_seal_id_before;

    if !candidate.payload.seals.is_empty() {
        let mut unsealed_ancestors = Vec::with_capacity(candidate.payload.seals.len());
        let mut cursor = parent.clone();
        while unsealed_ancestors.len() < candidate.payload.seals.len() {
            if cursor.height <= last_sealed_height {
                return Err(invalid(ExtensionViolation::SealChainBroken));
            }
            unsealed_ancestors.push(cursor.clone());
            cursor = store
                .retrieve_header(&txn, cursor.parent_id)?
                .ok_or(ProtocolError::NotFound)?;
        }
        unsealed_ancestors.reverse();

        for (seal, ancestor) in candidate.payload.seals.iter().zip(unsealed_ancestors.iter()) {
            if seal.block_id != ancestor.id() {
                return Err(invalid(ExtensionViolation::SealChainBroken));
            }
            if seal.previous_state.0 != prev_final_state.0 {
                return Err(invalid(ExtensionViolation::SealChainBroken));
            }
            prev_final_state = seal.final_state;
            latest_seal_id = Some(seal.id());
        }
    }

    // 9. Service events, in order
    let mut local_counter = store
        .lookup_epoch_counter(&txn, parent.id())?
        .ok_or(ProtocolError::NotFound)?;
    let mut local_phase = store.lookup_phase(&txn, parent.id())?.ok_or(ProtocolError::NotFound)?;
    let mut pending_setup_event: Option<(Identifier, ServiceEvent)> =
        match store.lookup_next_epoch_setup(&txn, parent.id())? {
            Some(event_id) => store.retrieve_service_event(&txn, event_id)?.map(|e| (event_id, e)),
            None => None,
        };
    let mut pending_commit_event_id: Option<Identifier> =
        store.lookup_next_epoch_commit(&txn, parent.id())?;
    let parent_current_setup_id = store
        .lookup_current_epoch_setup(&txn, parent.id())?
        .ok_or(ProtocolError::NotFound)?;
    let parent_current_commit_id = store
        .lookup_current_epoch_commit(&txn, parent.id())?
        .ok_or(ProtocolError::NotFound)?;
    let parent_previous_setup_id = store.lookup_previous_epoch_setup(&txn, parent.id())?;
    let parent_previous_commit_id = store.lookup_previous_epoch_commit(&txn, parent.id())?;

    for seal in &candidate.payload.seals {
        for event in &seal.service_events {
            match event {
                ServiceEvent::EpochSetup { counter, final_view, participants, assignments, random_source } => {
                    if local_phase != Phase::Staking || *counter != local_counter + 1 {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    if *final_view <= candidate.header.view {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    if random_source.len() < RANDOM_SOURCE_MIN_LEN {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    if participants.is_empty() {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    if assignments.len() < 1 {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    // `IdentityList`'s `Deserialize` impl constructs it
                    // straight from its encoded fields, bypassing
                    // `canonical()`'s dedup/zero-stake checks; re-run them
                    // here so a setup event arriving over a deserializing
                    // transport can't smuggle an invalid list past this
                    // validator.
                    protocol_types::IdentityList::canonical(participants.as_slice().to_vec())
                        .map_err(|_| invalid(ExtensionViolation::EpochEventOutOfOrder))?;
                    local_phase = Phase::Setup;
                    let event_id = service_event_id(seal.id(), event);
                    pending_setup_event = Some((event_id, event.clone()));
                }
                ServiceEvent::EpochCommit { counter, cluster_qcs, dkg_group_key, dkg_participants } => {
                    if local_phase != Phase::Setup {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    let (_, setup_event) = pending_setup_event
                        .as_ref()
                        .ok_or_else(|| invalid(ExtensionViolation::EpochEventOutOfOrder))?;
                    let ServiceEvent::EpochSetup { counter: setup_counter, participants, assignments, .. } =
                        setup_event
                    else {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    };
                    if counter != setup_counter {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    if cluster_qcs.len() != assignments.len() {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    if dkg_group_key.is_empty() {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    let consensus_members: std::collections::BTreeSet<_> = participants
                        .filter_role(protocol_types::Role::Consensus)
                        .iter()
                        .map(|i| i.node_id)
                        .collect();
                    let dkg_members: std::collections::BTreeSet<_> =
                        dkg_participants.keys().copied().collect();
                    if consensus_members != dkg_members {
                        return Err(invalid(ExtensionViolation::EpochEventOutOfOrder));
                    }
                    local_phase = Phase::Committed;
                    pending_commit_event_id = Some(service_event_id(seal.id(), event));
                }
            }
        }
    }

    // 10. Epoch boundary
    let current_epoch_setup = store
        .retrieve_service_event(&txn, parent_current_setup_id)?
        .ok_or(ProtocolError::NotFound)?;
    let ServiceEvent::EpochSetup { final_view: current_final_view, .. } = current_epoch_setup else {
        return Err(ProtocolError::NotFound);
    };
    let mut final_counter = local_counter;
    let mut crossed_boundary = false;
    if candidate.header.view > current_final_view {
        if local_phase != Phase::Committed {
            return Err(invalid(ExtensionViolation::EpochFallback));
        }
        final_counter = local_counter + 1;
        local_phase = Phase::Staking;
        crossed_boundary = true;
    }

    // The epoch this candidate now observes as "current"/"previous":
    // unchanged from the parent's unless this block is the one that
    // crosses the boundary, in which case the parent's "next" becomes
    // this block's "current" and the parent's old "current" slides back
    // to "previous".
    let (new_current_setup_id, new_current_commit_id, new_previous_setup_id, new_previous_commit_id) =
        if crossed_boundary {
            let (next_setup_id, _) = pending_setup_event
                .as_ref()
                .ok_or_else(|| invalid(ExtensionViolation::EpochFallback))?;
            let next_commit_id =
                pending_commit_event_id.ok_or_else(|| invalid(ExtensionViolation::EpochFallback))?;
            (*next_setup_id, next_commit_id, Some(parent_current_setup_id), Some(parent_current_commit_id))
        } else {
            (parent_current_setup_id, parent_current_commit_id, parent_previous_setup_id, parent_previous_commit_id)
        };

    // All checks passed: persist.
    // `index_by_height` is populated by `finalize`, not here: it records
    // the canonical block at a height, which is only decided once a block
    // is finalized. Until then, competing forks may share a height.
    let candidate_id = candidate.id();
    store.insert_header(&mut txn, &candidate.header)?;
    store.insert_payload(&mut txn, candidate_id, &candidate.payload)?;
    for result in &candidate.payload.results {
        store.insert_execution_result(&mut txn, result)?;
    }
    for seal in &candidate.payload.seals {
        store.insert_seal(&mut txn, seal)?;
        for event in &seal.service_events {
            let event_id = service_event_id(seal.id(), event);
            store.insert_service_event(&mut txn, event_id, event)?;
        }
    }
    if let Some(seal_id) = latest_seal_id {
        store.index_fork_latest_seal(&mut txn, candidate_id, seal_id)?;
    }
    store.index_epoch_counter(&mut txn, candidate_id, final_counter)?;
    store.index_phase(&mut txn, candidate_id, local_phase)?;
    if let Some((event_id, _)) = &pending_setup_event {
        store.index_next_epoch_setup(&mut txn, candidate_id, *event_id)?;
    }
    if local_phase == Phase::Committed {
        if let Some(event_id) = pending_commit_event_id {
            store.index_next_epoch_commit(&mut txn, candidate_id, event_id)?;
        }
    }
    store.index_current_epoch_setup(&mut txn, candidate_id, new_current_setup_id)?;
    store.index_current_epoch_commit(&mut txn, candidate_id, new_current_commit_id)?;
    if let Some(event_id) = new_previous_setup_id {
        store.index_previous_epoch_setup(&mut txn, candidate_id, event_id)?;
    }
    if let Some(event_id) = new_previous_commit_id {
        store.index_previous_epoch_commit(&mut txn, candidate_id, event_id)?;
    }

    store.commit(txn)?;
    Ok(())
}
