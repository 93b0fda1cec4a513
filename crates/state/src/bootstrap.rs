//! Bootstrapping a fresh chain from a root block/result/seal triple (§6).
//! Runs once against empty storage; every check here is permanent and
//! none of it mutates storage until the whole input is accepted.

use serde::{Deserialize, Serialize};

use protocol_api::storage::StateStore;
use protocol_types::{Block, ExecutionResult, Identifier, Phase, Seal, ServiceEvent};
use tracing::instrument;

use crate::config::BootstrapPolicy;
use crate::error::{BootstrapViolation, ProtocolError};
use crate::support::service_event_id;

fn invalid(v: BootstrapViolation) -> ProtocolError {
    ProtocolError::InvalidBootstrap(v)
}

/// The on-disk shape of a bootstrap file: the same root block/result/seal
/// triple `bootstrap` takes directly, serialized as JSON for an operator
/// to hand a fresh deployment.
#[derive(Debug, Serialize, Deserialize)]
pub struct BootstrapFile {
    pub root: Block,
    pub root_result: ExecutionResult,
    pub root_seal: Seal,
    pub initial_epoch_counter: u64,
}

/// Loads a `BootstrapFile` from `path` and runs it through `bootstrap`.
/// The file is untrusted input: every check `bootstrap` already performs
/// still runs against its contents, including the `IdentityList`
/// re-validation that a bare `Deserialize` would otherwise skip.
#[instrument(skip(store, policy))]
pub fn bootstrap_from_json_file<S: StateStore>(
    store: &S,
    path: impl AsRef<std::path::Path> + std::fmt::Debug,
    policy: &BootstrapPolicy,
) -> Result<(), ProtocolError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| invalid(BootstrapViolation::BootstrapFile(e.to_string())))?;
    let file: BootstrapFile = serde_json::from_str(&contents)
        .map_err(|e| invalid(BootstrapViolation::BootstrapFile(e.to_string())))?;
    bootstrap(store, &file.root, &file.root_result, &file.root_seal, file.initial_epoch_counter, policy)
}

/// A pair of `EpochSetup`/`EpochCommit` service events found in the root
/// seal for one counter.
struct EventPair {
    setup: ServiceEvent,
    commit: ServiceEvent,
}

fn find_pair(seal: &Seal, counter: u64) -> Option<EventPair> {
    let setup = seal.service_events.iter().find(|e| {
        matches!(e, ServiceEvent::EpochSetup { counter: c, .. } if *c == counter)
    })?;
    let commit = seal.service_events.iter().find(|e| {
        matches!(e, ServiceEvent::EpochCommit { counter: c, .. } if *c == counter)
    })?;
    Some(EventPair { setup: setup.clone(), commit: commit.clone() })
}

/// Validates and persists the genesis state: `root` at height 0, its
/// self-seal, its execution result, and the epoch the root seal
/// establishes. Fails without touching storage if any check is violated.
#[instrument(skip_all, fields(initial_epoch_counter))]
pub fn bootstrap<S: StateStore>(
    store: &S,
    root: &Block,
    root_result: &ExecutionResult,
    root_seal: &Seal,
    initial_epoch_counter: u64,
    policy: &BootstrapPolicy,
) -> Result<(), ProtocolError> {
    root.valid_structure().map_err(|_| invalid(BootstrapViolation::InconsistentRoot))?;
    if root.header.height != 0 || !root.header.parent_id.is_zero() {
        return Err(invalid(BootstrapViolation::InconsistentRoot));
    }
    if !root.payload.guarantees.is_empty() {
        return Err(invalid(BootstrapViolation::RootHasGuarantees));
    }
    if root.payload.seals.len() != 1 || root.payload.seals[0] != *root_seal {
        return Err(invalid(BootstrapViolation::WrongSealCount));
    }
    // The seal embedded in the root block's own payload cannot reference
    // the root block's id by value (the id is a hash over the payload
    // that contains the seal); `Identifier::ZERO` stands in as "this
    // block" for a self-seal the way `parent_id` does for "no parent".
    if root_seal.block_id != Identifier::ZERO {
        return Err(invalid(BootstrapViolation::WrongSealCount));
    }

    let current = find_pair(root_seal, initial_epoch_counter)
        .ok_or_else(|| invalid(BootstrapViolation::IncompleteBootstrap))?;
    let ServiceEvent::EpochSetup { final_view, participants, assignments, .. } = &current.setup
    else {
        return Err(invalid(BootstrapViolation::IncompleteBootstrap));
    };
    if *final_view <= root.header.view {
        return Err(invalid(BootstrapViolation::FinalViewTooLow));
    }
    // `participants` arrived through `ServiceEvent`'s `Deserialize` impl
    // when the root seal was loaded from a bootstrap file, which builds
    // the list straight from its fields and skips `canonical()`'s
    // dedup/zero-stake checks; re-run them before trusting the list.
    protocol_types::IdentityList::canonical(participants.as_slice().to_vec())
        .map_err(|e| invalid(BootstrapViolation::Identity(e)))?;
    protocol_types::Clusters::partition(
        &participants.filter_role(protocol_types::Role::Collection),
        assignments.as_slice().to_vec(),
    )
    .map_err(|e| invalid(BootstrapViolation::Identity(e)))?;

    // A policy-opted-in "complete" root seal additionally establishes the
    // epoch immediately following the initial one, letting bootstrap start
    // the fork directly in Committed phase (§9 Open Question).
    let next = if policy.commit_phase_on_complete_root_seal {
        Some(
            find_pair(root_seal, initial_epoch_counter + 1)
                .ok_or_else(|| invalid(BootstrapViolation::IncompleteBootstrap))?,
        )
    } else {
        None
    };

    let mut txn = store.begin()?;
    let root_id = root.id();
    store.insert_header(&mut txn, &root.header)?;
    store.index_by_height(&mut txn, 0, root_id)?;
    store.insert_payload(&mut txn, root_id, &root.payload)?;
    store.insert_seal(&mut txn, root_seal)?;
    store.index_fork_latest_seal(&mut txn, root_id, root_seal.id())?;
    store.insert_execution_result(&mut txn, root_result)?;

    let seal_id = root_seal.id();
    let setup_id = service_event_id(seal_id, &current.setup);
    let commit_id = service_event_id(seal_id, &current.commit);
    store.insert_service_event(&mut txn, setup_id, &current.setup)?;
    store.insert_service_event(&mut txn, commit_id, &current.commit)?;

    store.update_finalized_height(&mut txn, 0)?;
    store.update_sealed_height(&mut txn, 0)?;
    store.update_boundary(&mut txn, 0)?;
    store.index_epoch_counter(&mut txn, root_id, initial_epoch_counter)?;
    store.index_current_epoch_setup(&mut txn, root_id, setup_id)?;
    store.index_current_epoch_commit(&mut txn, root_id, commit_id)?;

    match next {
        Some(pair) => {
            let next_setup_id = service_event_id(seal_id, &pair.setup);
            let next_commit_id = service_event_id(seal_id, &pair.commit);
            store.insert_service_event(&mut txn, next_setup_id, &pair.setup)?;
            store.insert_service_event(&mut txn, next_commit_id, &pair.commit)?;
            store.index_phase(&mut txn, root_id, Phase::Committed)?;
            store.index_next_epoch_setup(&mut txn, root_id, next_setup_id)?;
            store.index_next_epoch_commit(&mut txn, root_id, next_commit_id)?;
        }
        None => {
            store.index_phase(&mut txn, root_id, Phase::Staking)?;
        }
    }

    store.commit(txn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_storage::MemStateStore;
    use protocol_types::{
        Chunk, Clusters, CollectionGuarantee, Header, Identifier, Identity, IdentityList, Payload,
        Role, StateCommitment,
    };

    fn identity(id: u8) -> Identity {
        Identity {
            node_id: Identifier::from_byte(id),
            address: format!("node-{id}"),
            role: Role::Consensus,
            stake: 1,
            network_pub_key: vec![id],
            staking_pub_key: vec![id],
        }
    }

    fn root_fixture() -> (Block, ExecutionResult, Seal) {
        let participants = IdentityList::canonical(vec![identity(1)]).unwrap();
        let assignments = Clusters::partition(&IdentityList::canonical(vec![]).unwrap(), vec![]).unwrap();
        let setup = ServiceEvent::EpochSetup {
            counter: 0,
            final_view: 1000,
            participants,
            assignments,
            random_source: vec![7; 16],
        };
        let commit = ServiceEvent::EpochCommit {
            counter: 0,
            cluster_qcs: vec![],
            dkg_group_key: vec![1, 2, 3],
            dkg_participants: std::collections::BTreeMap::new(),
        };
        let payload = Payload::default();
        let header = Header {
            chain_id: "genesis".into(),
            parent_id: Identifier::ZERO,
            height: 0,
            view: 0,
            timestamp: 0,
            payload_hash: payload.hash(),
            proposer_id: Identifier::ZERO,
            parent_voter_ids: vec![],
            parent_voter_sig: vec![],
            proposer_sig: vec![],
        };
        let root = Block { header, payload };
        let seal = Seal {
            block_id: Identifier::ZERO,
            result_id: Identifier::from_byte(9),
            previous_state: StateCommitment([0u8; 32]),
            final_state: StateCommitment([1u8; 32]),
            aggregated_approval_sigs: vec![],
            service_events: vec![setup, commit],
        };
        let mut root_with_seal = root;
        root_with_seal.payload.seals.push(seal.clone());
        root_with_seal.header.payload_hash = root_with_seal.payload.hash();
        let result = ExecutionResult {
            previous_result_id: Identifier::ZERO,
            block_id: root_with_seal.id(),
            chunks: vec![Chunk { final_state: StateCommitment([1u8; 32]) }],
            service_events: vec![],
        };
        (root_with_seal, result, seal)
    }

    #[test]
    fn accepts_a_well_formed_root() {
        let store = MemStateStore::new();
        let (root, result, seal) = root_fixture();
        bootstrap(&store, &root, &result, &seal, 0, &BootstrapPolicy::default()).unwrap();
    }

    #[test]
    fn rejects_guarantees_in_root_payload() {
        let store = MemStateStore::new();
        let (mut root, result, seal) = root_fixture();
        root.payload.guarantees.push(CollectionGuarantee {
            collection_id: Identifier::from_byte(1),
            reference_block_id: Identifier::ZERO,
            signer_ids: vec![],
        });
        root.header.payload_hash = root.payload.hash();
        let err = bootstrap(&store, &root, &result, &seal, 0, &BootstrapPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidBootstrap(BootstrapViolation::RootHasGuarantees)
        ));
    }

    #[test]
    fn rejects_nonzero_root_height() {
        let store = MemStateStore::new();
        let (mut root, result, seal) = root_fixture();
        root.header.height = 1;
        let err = bootstrap(&store, &root, &result, &seal, 0, &BootstrapPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidBootstrap(BootstrapViolation::InconsistentRoot)
        ));
    }

    #[test]
    fn rejects_missing_epoch_commit() {
        let store = MemStateStore::new();
        let (mut root, result, mut seal) = root_fixture();
        seal.service_events.retain(|e| !matches!(e, ServiceEvent::EpochCommit { .. }));
        root.payload.seals = vec![seal.clone()];
        root.header.payload_hash = root.payload.hash();
        let err = bootstrap(&store, &root, &result, &seal, 0, &BootstrapPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidBootstrap(BootstrapViolation::IncompleteBootstrap)
        ));
    }
}
