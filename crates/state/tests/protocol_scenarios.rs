//! End-to-end scenarios exercising bootstrap, extension, finalization, and
//! epoch transitions together against an in-memory store. These go beyond
//! the single-consumer, single-child cases already covered by unit tests:
//! competing forks, a full epoch boundary crossing, and consumer-observed
//! event ordering.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use protocol_api::consumer::ProtocolConsumer;
use protocol_state::{error, BootstrapPolicy, ProtocolError, ProtocolState};
use protocol_storage::MemStateStore;
use protocol_types::{
    Block, Clusters, DkgParticipant, ExecutionResult, Header, Identifier, Identity, IdentityList,
    Payload, Phase, QuorumCertificate, Role, Seal, ServiceEvent, StateCommitment,
};

fn identity(id: u8, role: Role) -> Identity {
    Identity {
        node_id: Identifier::from_byte(id),
        address: format!("node-{id}"),
        role,
        stake: 1,
        network_pub_key: vec![id],
        staking_pub_key: vec![id],
    }
}

fn commitment(b: u8) -> StateCommitment {
    StateCommitment([b; 32])
}

fn participants_and_assignments() -> (IdentityList, Clusters) {
    let participants =
        IdentityList::canonical(vec![identity(1, Role::Collection), identity(2, Role::Consensus)])
            .unwrap();
    let assignments = Clusters::partition(
        &participants.filter_role(Role::Collection),
        vec![vec![Identifier::from_byte(1)]],
    )
    .unwrap();
    (participants, assignments)
}

/// A genesis triple whose root seal establishes `counter` with the given
/// final view, staking one collection node and one consensus node.
fn genesis(counter: u64, final_view: u64) -> (Block, ExecutionResult, Seal) {
    let (participants, assignments) = participants_and_assignments();
    let setup = ServiceEvent::EpochSetup {
        counter,
        final_view,
        participants,
        assignments,
        random_source: vec![7; 16],
    };
    let commit = ServiceEvent::EpochCommit {
        counter,
        cluster_qcs: vec![],
        dkg_group_key: vec![1, 2, 3],
        dkg_participants: BTreeMap::new(),
    };
    let payload = Payload::default();
    let header = Header {
        chain_id: "test-chain".into(),
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
    let mut root = Block { header, payload };
    let seal = Seal {
        block_id: Identifier::ZERO,
        result_id: Identifier::from_byte(250),
        previous_state: commitment(0),
        final_state: commitment(1),
        aggregated_approval_sigs: vec![],
        service_events: vec![setup, commit],
    };
    root.payload.seals.push(seal.clone());
    root.header.payload_hash = root.payload.hash();
    let result = ExecutionResult {
        previous_result_id: Identifier::ZERO,
        block_id: root.id(),
        chunks: vec![],
        service_events: vec![],
    };
    (root, result, seal)
}

fn block_on(parent: &Block, view: u64, payload: Payload) -> Block {
    let header = Header {
        chain_id: parent.header.chain_id.clone(),
        parent_id: parent.id(),
        height: parent.header.height + 1,
        view,
        timestamp: 0,
        payload_hash: payload.hash(),
        proposer_id: Identifier::ZERO,
        parent_voter_ids: vec![],
        parent_voter_sig: vec![],
        proposer_sig: vec![],
    };
    Block { header, payload }
}

fn child(parent: &Block, view: u64) -> Block {
    block_on(parent, view, Payload::default())
}

fn child_with_seal(parent: &Block, view: u64, seal: Seal) -> Block {
    let mut payload = Payload::default();
    payload.seals.push(seal);
    block_on(parent, view, payload)
}

fn setup_event(counter: u64, final_view: u64) -> ServiceEvent {
    let (participants, assignments) = participants_and_assignments();
    ServiceEvent::EpochSetup { counter, final_view, participants, assignments, random_source: vec![9; 16] }
}

fn commit_event(counter: u64) -> ServiceEvent {
    let mut dkg_participants = BTreeMap::new();
    dkg_participants.insert(Identifier::from_byte(2), DkgParticipant { key_share: vec![1], index: 0 });
    ServiceEvent::EpochCommit {
        counter,
        cluster_qcs: vec![QuorumCertificate {
            block_id: Identifier::from_byte(1),
            view: 0,
            signer_ids: vec![],
            signature: vec![],
        }],
        dkg_group_key: vec![4, 5, 6],
        dkg_participants,
    }
}

fn seal(
    block_id: Identifier,
    previous_state: StateCommitment,
    final_state: StateCommitment,
    events: Vec<ServiceEvent>,
) -> Seal {
    Seal {
        block_id,
        result_id: Identifier::from_byte(99),
        previous_state,
        final_state,
        aggregated_approval_sigs: vec![],
        service_events: events,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordedEvent {
    SetupPhaseStarted(u64, Identifier),
    CommittedPhaseStarted(u64, Identifier),
    Transition(u64, Identifier),
}

#[derive(Default)]
struct RecordingConsumer {
    events: Mutex<Vec<RecordedEvent>>,
}

impl ProtocolConsumer for RecordingConsumer {
    fn epoch_transition(&self, new_counter: u64, first_block: &Header) -> Result<(), String> {
        self.events.lock().unwrap().push(RecordedEvent::Transition(new_counter, first_block.id()));
        Ok(())
    }

    fn epoch_setup_phase_started(&self, current_counter: u64, block: &Header) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::SetupPhaseStarted(current_counter, block.id()));
        Ok(())
    }

    fn epoch_committed_phase_started(&self, current_counter: u64, block: &Header) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::CommittedPhaseStarted(current_counter, block.id()));
        Ok(())
    }
}

#[test]
fn s1_clean_bootstrap_extend_finalize() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    state.extend(&b1).unwrap();
    state.finalize(b1.id()).unwrap();

    assert_eq!(state.finalized().unwrap().head().unwrap().id(), b1.id());
    assert_eq!(state.sealed().unwrap().head().unwrap().id(), root.id());
}

#[test]
fn s2_rejects_height_too_large() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let mut bad = child(&root, 1);
    bad.header.height = 2;
    bad.header.payload_hash = bad.payload.hash();
    let err = state.extend(&bad).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidExtension(error::ExtensionViolation::WrongHeight)));
    assert!(state.at_block(bad.id()).is_err());
}

#[test]
fn s3_rejects_missing_parent() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let mut orphan = child(&root, 1);
    orphan.header.parent_id = Identifier::from_byte(0xAB);
    orphan.header.height = 7;
    let err = state.extend(&orphan).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidExtension(error::ExtensionViolation::UnknownParent)));
}

#[test]
fn s4_rejects_seal_chain_gap() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    state.extend(&b1).unwrap();

    // the fork tip's sealed state after b1 is still root's final_state
    // (commitment(1)); this seal claims a different previous state.
    let broken = seal(b1.id(), commitment(0xEE), commitment(2), vec![]);
    let b2 = child_with_seal(&b1, 2, broken);
    let err = state.extend(&b2).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidExtension(error::ExtensionViolation::SealChainBroken)));
}

#[test]
fn s4b_rejects_seal_naming_the_wrong_block() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    state.extend(&b1).unwrap();

    // commitments chain correctly, but the seal claims to seal `root`
    // again instead of the next unsealed ancestor, `b1`.
    let wrong_target = seal(root.id(), commitment(1), commitment(2), vec![]);
    let b2 = child_with_seal(&b1, 2, wrong_target);
    let err = state.extend(&b2).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidExtension(error::ExtensionViolation::SealChainBroken)));
}

#[test]
fn s5_epoch_transition_through_setup_and_commit() {
    let mut state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    state.extend(&b1).unwrap();

    let setup_seal = seal(b1.id(), commitment(1), commitment(2), vec![setup_event(2, 2000)]);
    let b2 = child_with_seal(&b1, 2, setup_seal);
    state.extend(&b2).unwrap();
    assert_eq!(state.at_block(b2.id()).unwrap().phase().unwrap(), Phase::Setup);

    let commit_seal = seal(b2.id(), commitment(2), commitment(3), vec![commit_event(2)]);
    let b3 = child_with_seal(&b2, 3, commit_seal);
    state.extend(&b3).unwrap();
    assert_eq!(state.at_block(b3.id()).unwrap().phase().unwrap(), Phase::Committed);

    let recorder = Arc::new(RecordingConsumer::default());
    state.register_consumer(recorder.clone());
    state.finalize(b3.id()).unwrap();

    let b4 = child(&b3, 1001);
    state.extend(&b4).unwrap();
    state.finalize(b4.id()).unwrap();

    assert_eq!(state.at_block(b4.id()).unwrap().epochs().unwrap().current().unwrap().counter, 2);

    let recorded = recorder.events.lock().unwrap();
    assert_eq!(
        recorded.as_slice(),
        &[
            RecordedEvent::SetupPhaseStarted(1, b2.id()),
            RecordedEvent::CommittedPhaseStarted(1, b3.id()),
            RecordedEvent::Transition(2, b4.id()),
        ]
    );
}

#[test]
fn s6_epoch_fallback_off_a_setup_only_fork() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    state.extend(&b1).unwrap();
    let setup_seal = seal(b1.id(), commitment(1), commitment(2), vec![setup_event(2, 2000)]);
    let b2 = child_with_seal(&b1, 2, setup_seal);
    state.extend(&b2).unwrap();

    // b2's fork is only in Setup phase; a block crossing the epoch-1
    // boundary off of it can never reach Committed.
    let falls_off = child(&b2, 1001);
    let err = state.extend(&falls_off).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidExtension(error::ExtensionViolation::EpochFallback)));
}

#[test]
fn s7_conflicting_forks_keep_independent_next_epoch_data() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1a = child(&root, 1);
    let b1b = child(&root, 2);
    state.extend(&b1a).unwrap();
    state.extend(&b1b).unwrap();

    let setup_a = seal(b1a.id(), commitment(1), commitment(2), vec![setup_event(2, 1000)]);
    let b2a = child_with_seal(&b1a, 3, setup_a);
    let setup_b = seal(b1b.id(), commitment(1), commitment(2), vec![setup_event(2, 2000)]);
    let b2b = child_with_seal(&b1b, 4, setup_b);
    state.extend(&b2a).unwrap();
    state.extend(&b2b).unwrap();

    let commit_a = seal(b2a.id(), commitment(2), commitment(3), vec![commit_event(2)]);
    let b3a = child_with_seal(&b2a, 5, commit_a);
    let commit_b = seal(b2b.id(), commitment(2), commitment(3), vec![commit_event(2)]);
    let b3b = child_with_seal(&b2b, 6, commit_b);
    state.extend(&b3a).unwrap();
    state.extend(&b3b).unwrap();

    let next_a = state.at_block(b3a.id()).unwrap().epochs().unwrap().next().unwrap();
    let next_b = state.at_block(b3b.id()).unwrap().epochs().unwrap().next().unwrap();
    assert_eq!(next_a.final_view, 1000);
    assert_eq!(next_b.final_view, 2000);
}

#[test]
fn p1_competing_children_of_the_same_parent_both_persist() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let a = child(&root, 1);
    let b = child(&root, 2);
    state.extend(&a).unwrap();
    state.extend(&b).unwrap();

    assert_eq!(state.at_block(a.id()).unwrap().head().unwrap().id(), a.id());
    assert_eq!(state.at_block(b.id()).unwrap().head().unwrap().id(), b.id());
}

#[test]
fn p2_finalized_height_is_monotone_and_history_stays_reachable() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    let b2 = child(&b1, 2);
    let b3 = child(&b2, 3);
    state.extend(&b1).unwrap();
    state.extend(&b2).unwrap();
    state.extend(&b3).unwrap();

    state.finalize(b1.id()).unwrap();
    assert_eq!(state.finalized().unwrap().head().unwrap().id(), b1.id());

    // finalizing b3 finalizes b2 along the way; b1 must remain reachable.
    state.finalize(b3.id()).unwrap();
    assert_eq!(state.finalized().unwrap().head().unwrap().id(), b3.id());
    assert_eq!(state.at_block(b1.id()).unwrap().head().unwrap().id(), b1.id());
}

#[test]
fn p3_sealed_height_never_exceeds_finalized_height() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (root, result, root_seal) = genesis(1, 1000);
    state.bootstrap(&root, &result, &root_seal, 1).unwrap();

    let b1 = child(&root, 1);
    state.extend(&b1).unwrap();
    let sealing = seal(b1.id(), commitment(1), commitment(2), vec![]);
    let b2 = child_with_seal(&b1, 2, sealing);
    state.extend(&b2).unwrap();

    // b1 is sealed by b2's payload but not yet finalized: sealed height
    // must not race ahead of the finalized height.
    state.finalize(b1.id()).unwrap();
    let sealed_height = state.sealed().unwrap().head().unwrap().height;
    let finalized_height = state.finalized().unwrap().head().unwrap().height;
    assert!(sealed_height <= finalized_height);

    state.finalize(b2.id()).unwrap();
    let sealed_height = state.sealed().unwrap().head().unwrap().height;
    let finalized_height = state.finalized().unwrap().head().unwrap().height;
    assert_eq!(sealed_height, b1.header.height);
    assert!(sealed_height <= finalized_height);
}

#[test]
fn p7_rejected_bootstrap_leaves_storage_untouched() {
    let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
    let (mut root, result, root_seal) = genesis(1, 1000);
    root.header.height = 1;

    let err = state.bootstrap(&root, &result, &root_seal, 1).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::InvalidBootstrap(error::BootstrapViolation::InconsistentRoot)
    ));

    // a subsequent, well-formed bootstrap must still succeed: the failed
    // attempt committed nothing.
    let (good_root, good_result, good_seal) = genesis(1, 1000);
    state.bootstrap(&good_root, &good_result, &good_seal, 1).unwrap();
    assert_eq!(state.finalized().unwrap().head().unwrap().id(), good_root.id());
}
