//! The protocol state machine: bootstrap, extension, finalization, and
//! epoch-aware queries over a pluggable `StateStore` backend.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod extend;
pub mod finalize;
pub mod snapshot;
mod support;

use std::sync::Arc;

use parking_lot::Mutex;
use protocol_api::consumer::ProtocolConsumer;
use protocol_api::storage::StateStore;
use protocol_types::{Block, ExecutionResult, Identifier, Seal};

pub use config::BootstrapPolicy;
pub use error::ProtocolError;
pub use snapshot::{EpochQueries, Snapshot};

/// The single entry point callers hold: one `ProtocolState` per chain,
/// serializing writers behind `write_lock` while reads pass straight
/// through to the store (§9's "one owning value exposing three capability
/// sets" — mutation, query, and consumer registration).
pub struct ProtocolState<S: StateStore> {
    store: S,
    write_lock: Mutex<()>,
    consumers: Vec<Arc<dyn ProtocolConsumer>>,
    policy: BootstrapPolicy,
}

impl<S: StateStore> ProtocolState<S> {
    pub fn new(store: S, policy: BootstrapPolicy) -> Self {
        Self { store, write_lock: Mutex::new(()), consumers: Vec::new(), policy }
    }

    pub fn register_consumer(&mut self, consumer: Arc<dyn ProtocolConsumer>) {
        self.consumers.push(consumer);
    }

    /// Bootstraps genesis state. Must be called exactly once, before any
    /// `extend`/`finalize` call, against empty storage.
    pub fn bootstrap(
        &self,
        root: &Block,
        root_result: &ExecutionResult,
        root_seal: &Seal,
        initial_epoch_counter: u64,
    ) -> Result<(), ProtocolError> {
        let _guard = self.write_lock.lock();
        bootstrap::bootstrap(&self.store, root, root_result, root_seal, initial_epoch_counter, &self.policy)
    }

    /// Bootstraps genesis state from a JSON bootstrap file (§6).
    pub fn bootstrap_from_json_file(
        &self,
        path: impl AsRef<std::path::Path> + std::fmt::Debug,
    ) -> Result<(), ProtocolError> {
        let _guard = self.write_lock.lock();
        bootstrap::bootstrap_from_json_file(&self.store, path, &self.policy)
    }

    /// Validates and, if every check passes, persists `candidate` (§4.F).
    pub fn extend(&self, candidate: &Block) -> Result<(), ProtocolError> {
        let _guard = self.write_lock.lock();
        extend::extend(&self.store, candidate)
    }

    /// Advances the finalized head to `block_id`, firing consumer
    /// callbacks along the way (§4.G).
    pub fn finalize(&self, block_id: Identifier) -> Result<(), ProtocolError> {
        let _guard = self.write_lock.lock();
        finalize::finalize(&self.store, &self.consumers, block_id)
    }

    /// Announces `block_id`'s parent as safe to build on (§4.G).
    pub fn mark_valid(&self, block_id: Identifier) -> Result<(), ProtocolError> {
        let _guard = self.write_lock.lock();
        finalize::mark_valid(&self.store, &self.consumers, block_id)
    }

    /// A read-only view of state as of `block_id`, which need not be
    /// finalized.
    pub fn at_block(&self, block_id: Identifier) -> Result<Snapshot<'_, S>, ProtocolError> {
        Snapshot::new(&self.store, block_id)
    }

    /// A read-only view of state as of the current finalized head.
    pub fn finalized(&self) -> Result<Snapshot<'_, S>, ProtocolError> {
        let txn = self.store.begin()?;
        let height = self.store.retrieve_finalized_height(&txn)?;
        let id = self.store.lookup_by_height(&txn, height)?.ok_or(ProtocolError::NotFound)?;
        self.at_block(id)
    }

    /// A read-only view of state as of the block that produced the
    /// current sealed state commitment.
    pub fn sealed(&self) -> Result<Snapshot<'_, S>, ProtocolError> {
        let txn = self.store.begin()?;
        let height = self.store.retrieve_sealed_height(&txn)?;
        let id = self.store.lookup_by_height(&txn, height)?.ok_or(ProtocolError::NotFound)?;
        self.at_block(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_storage::MemStateStore;
    use protocol_types::{
        Chunk, Clusters, Header, Identity, IdentityList, Payload, Role, StateCommitment,
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

    fn bootstrap_fixture() -> (Block, ExecutionResult, Seal) {
        let participants = IdentityList::canonical(vec![identity(1)]).unwrap();
        let assignments = Clusters::partition(&IdentityList::canonical(vec![]).unwrap(), vec![]).unwrap();
        let setup = protocol_types::ServiceEvent::EpochSetup {
            counter: 0,
            final_view: 1000,
            participants,
            assignments,
            random_source: vec![7; 16],
        };
        let commit = protocol_types::ServiceEvent::EpochCommit {
            counter: 0,
            cluster_qcs: vec![],
            dkg_group_key: vec![1],
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
        let mut root = Block { header, payload };
        let seal = Seal {
            block_id: Identifier::ZERO,
            result_id: Identifier::from_byte(9),
            previous_state: StateCommitment([0u8; 32]),
            final_state: StateCommitment([1u8; 32]),
            aggregated_approval_sigs: vec![],
            service_events: vec![setup, commit],
        };
        root.payload.seals.push(seal.clone());
        root.header.payload_hash = root.payload.hash();
        let result = ExecutionResult {
            previous_result_id: Identifier::ZERO,
            block_id: root.id(),
            chunks: vec![Chunk { final_state: StateCommitment([1u8; 32]) }],
            service_events: vec![],
        };
        (root, result, seal)
    }

    fn child_of(parent: &Block, view: u64) -> Block {
        let payload = Payload::default();
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

    #[test]
    fn bootstrap_then_extend_then_finalize() {
        let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
        let (root, result, seal) = bootstrap_fixture();
        state.bootstrap(&root, &result, &seal, 0).unwrap();

        let child = child_of(&root, 1);
        state.extend(&child).unwrap();
        state.mark_valid(child.id()).unwrap();
        state.finalize(child.id()).unwrap();

        let snap = state.finalized().unwrap();
        assert_eq!(snap.head().unwrap().id(), child.id());
    }

    #[test]
    fn extend_rejects_unknown_parent() {
        let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
        let (root, result, seal) = bootstrap_fixture();
        state.bootstrap(&root, &result, &seal, 0).unwrap();

        let mut orphan = child_of(&root, 1);
        orphan.header.parent_id = Identifier::from_byte(200);
        let err = state.extend(&orphan).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidExtension(error::ExtensionViolation::UnknownParent)
        ));
    }

    #[test]
    fn finalize_rejects_unknown_block() {
        let state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
        let (root, result, seal) = bootstrap_fixture();
        state.bootstrap(&root, &result, &seal, 0).unwrap();
        let err = state.finalize(Identifier::from_byte(77)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidFinalize(error::FinalizeViolation::UnknownBlock)
        ));
    }

    #[test]
    fn consumer_rejection_aborts_finalize() {
        struct Rejecting;
        impl ProtocolConsumer for Rejecting {
            fn block_finalized(&self, _header: &Header) -> Result<(), String> {
                Err("no".to_string())
            }
        }
        let mut state = ProtocolState::new(MemStateStore::new(), BootstrapPolicy::default());
        state.register_consumer(Arc::new(Rejecting));
        let (root, result, seal) = bootstrap_fixture();
        state.bootstrap(&root, &result, &seal, 0).unwrap();
        let child = child_of(&root, 1);
        state.extend(&child).unwrap();
        let err = state.finalize(child.id()).unwrap_err();
        assert!(matches!(err, ProtocolError::ConsumerRejected(_)));

        // nothing committed: finalized head is still root
        let snap = state.finalized().unwrap();
        assert_eq!(snap.head().unwrap().id(), root.id());
    }
}
