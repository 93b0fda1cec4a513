//! An in-memory `StateStore`, used by the protocol-state test suite to
//! avoid disk I/O and keep unit tests fast and non-flaky.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use protocol_api::storage::{StateStore, StorageError, Txn as TxnMarker};
use protocol_types::{ExecutionResult, Header, Identifier, Payload, Phase, Seal, ServiceEvent};

#[derive(Debug, Default, Clone)]
struct Tables {
    headers: BTreeMap<Identifier, Header>,
    height_index: BTreeMap<u64, Identifier>,
    payloads: BTreeMap<Identifier, Payload>,
    seals: BTreeMap<Identifier, Seal>,
    block_seal: BTreeMap<Identifier, Identifier>,
    fork_latest_seal: BTreeMap<Identifier, Identifier>,
    execution_results: BTreeMap<Identifier, ExecutionResult>,
    service_events: BTreeMap<Identifier, ServiceEvent>,
    finalized_height: u64,
    sealed_height: u64,
    boundary: u64,
    epoch_counter_idx: BTreeMap<Identifier, u64>,
    phase_idx: BTreeMap<Identifier, Phase>,
    next_setup_idx: BTreeMap<Identifier, Identifier>,
    next_commit_idx: BTreeMap<Identifier, Identifier>,
    current_setup_idx: BTreeMap<Identifier, Identifier>,
    current_commit_idx: BTreeMap<Identifier, Identifier>,
    previous_setup_idx: BTreeMap<Identifier, Identifier>,
    previous_commit_idx: BTreeMap<Identifier, Identifier>,
}

/// In-memory implementation: `begin` clones the current tables, mutating
/// operations apply to the clone, and `commit` swaps it back in under the
/// write lock. This gives every transaction full isolation and atomicity
/// without a real WAL, which is adequate for a test-only backend.
#[derive(Debug, Default)]
pub struct MemStateStore {
    inner: RwLock<Tables>,
}

impl MemStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A staged, isolated copy of every table, committed atomically.
#[derive(Debug, Clone)]
pub struct MemTxn {
    tables: Tables,
}

impl TxnMarker for MemTxn {}

impl StateStore for MemStateStore {
    type Txn = MemTxn;

    fn begin(&self) -> Result<Self::Txn, StorageError> {
        Ok(MemTxn { tables: self.inner.read().clone() })
    }

    fn commit(&self, txn: Self::Txn) -> Result<(), StorageError> {
        *self.inner.write() = txn.tables;
        Ok(())
    }

    fn insert_header(&self, txn: &mut Self::Txn, header: &Header) -> Result<(), StorageError> {
        txn.tables.headers.insert(header.id(), header.clone());
        Ok(())
    }

    fn retrieve_header(
        &self,
        txn: &Self::Txn,
        id: Identifier,
    ) -> Result<Option<Header>, StorageError> {
        Ok(txn.tables.headers.get(&id).cloned())
    }

    fn index_by_height(
        &self,
        txn: &mut Self::Txn,
        height: u64,
        id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.height_index.insert(height, id);
        Ok(())
    }

    fn lookup_by_height(
        &self,
        txn: &Self::Txn,
        height: u64,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.height_index.get(&height).copied())
    }

    fn insert_payload(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        payload: &Payload,
    ) -> Result<(), StorageError> {
        txn.tables.payloads.insert(block_id, payload.clone());
        Ok(())
    }

    fn retrieve_payload(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Payload>, StorageError> {
        Ok(txn.tables.payloads.get(&block_id).cloned())
    }

    fn insert_seal(&self, txn: &mut Self::Txn, seal: &Seal) -> Result<(), StorageError> {
        let seal_id = seal.id();
        txn.tables.block_seal.insert(seal.block_id, seal_id);
        txn.tables.seals.insert(seal_id, seal.clone());
        Ok(())
    }

    fn lookup_block_seal(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.block_seal.get(&block_id).copied())
    }

    fn retrieve_seal(
        &self,
        txn: &Self::Txn,
        seal_id: Identifier,
    ) -> Result<Option<Seal>, StorageError> {
        Ok(txn.tables.seals.get(&seal_id).cloned())
    }

    fn insert_execution_result(
        &self,
        txn: &mut Self::Txn,
        result: &ExecutionResult,
    ) -> Result<(), StorageError> {
        let mut enc = protocol_types::codec::Encoder::new();
        enc.encode_bytes(result.block_id.as_bytes());
        enc.encode_bytes(result.previous_result_id.as_bytes());
        let result_id =
            Identifier::from(protocol_types::hash::hash32(b"execution_result", &enc.finish()));
        txn.tables.execution_results.insert(result_id, result.clone());
        Ok(())
    }

    fn index_fork_latest_seal(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        seal_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.fork_latest_seal.insert(block_id, seal_id);
        Ok(())
    }

    fn lookup_fork_latest_seal(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.fork_latest_seal.get(&block_id).copied())
    }

    fn retrieve_execution_result(
        &self,
        txn: &Self::Txn,
        result_id: Identifier,
    ) -> Result<Option<ExecutionResult>, StorageError> {
        Ok(txn.tables.execution_results.get(&result_id).cloned())
    }

    fn insert_service_event(
        &self,
        txn: &mut Self::Txn,
        event_id: Identifier,
        event: &ServiceEvent,
    ) -> Result<(), StorageError> {
        txn.tables.service_events.insert(event_id, event.clone());
        Ok(())
    }

    fn retrieve_service_event(
        &self,
        txn: &Self::Txn,
        event_id: Identifier,
    ) -> Result<Option<ServiceEvent>, StorageError> {
        Ok(txn.tables.service_events.get(&event_id).cloned())
    }

    fn retrieve_finalized_height(&self, txn: &Self::Txn) -> Result<u64, StorageError> {
        Ok(txn.tables.finalized_height)
    }

    fn update_finalized_height(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError> {
        txn.tables.finalized_height = height;
        Ok(())
    }

    fn retrieve_sealed_height(&self, txn: &Self::Txn) -> Result<u64, StorageError> {
        Ok(txn.tables.sealed_height)
    }

    fn update_sealed_height(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError> {
        txn.tables.sealed_height = height;
        Ok(())
    }

    fn retrieve_boundary(&self, txn: &Self::Txn) -> Result<u64, StorageError> {
        Ok(txn.tables.boundary)
    }

    fn update_boundary(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError> {
        txn.tables.boundary = height;
        Ok(())
    }

    fn index_epoch_counter(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        counter: u64,
    ) -> Result<(), StorageError> {
        txn.tables.epoch_counter_idx.insert(block_id, counter);
        Ok(())
    }

    fn lookup_epoch_counter(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<u64>, StorageError> {
        Ok(txn.tables.epoch_counter_idx.get(&block_id).copied())
    }

    fn index_phase(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        phase: Phase,
    ) -> Result<(), StorageError> {
        txn.tables.phase_idx.insert(block_id, phase);
        Ok(())
    }

    fn lookup_phase(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Phase>, StorageError> {
        Ok(txn.tables.phase_idx.get(&block_id).copied())
    }

    fn index_next_epoch_setup(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.next_setup_idx.insert(block_id, event_id);
        Ok(())
    }

    fn lookup_next_epoch_setup(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.next_setup_idx.get(&block_id).copied())
    }

    fn index_next_epoch_commit(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.next_commit_idx.insert(block_id, event_id);
        Ok(())
    }

    fn lookup_next_epoch_commit(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.next_commit_idx.get(&block_id).copied())
    }

    fn index_current_epoch_setup(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.current_setup_idx.insert(block_id, event_id);
        Ok(())
    }

    fn lookup_current_epoch_setup(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.current_setup_idx.get(&block_id).copied())
    }

    fn index_current_epoch_commit(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.current_commit_idx.insert(block_id, event_id);
        Ok(())
    }

    fn lookup_current_epoch_commit(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.current_commit_idx.get(&block_id).copied())
    }

    fn index_previous_epoch_setup(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.previous_setup_idx.insert(block_id, event_id);
        Ok(())
    }

    fn lookup_previous_epoch_setup(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.previous_setup_idx.get(&block_id).copied())
    }

    fn index_previous_epoch_commit(
        &self,
        txn: &mut Self::Txn,
        block_id: Identifier,
        event_id: Identifier,
    ) -> Result<(), StorageError> {
        txn.tables.previous_commit_idx.insert(block_id, event_id);
        Ok(())
    }

    fn lookup_previous_epoch_commit(
        &self,
        txn: &Self::Txn,
        block_id: Identifier,
    ) -> Result<Option<Identifier>, StorageError> {
        Ok(txn.tables.previous_commit_idx.get(&block_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_types::{Header, Payload};

    fn header(parent: Identifier, height: u64, view: u64) -> Header {
        Header {
            chain_id: "test".into(),
            parent_id: parent,
            height,
            view,
            timestamp: 0,
            payload_hash: Payload::default().hash(),
            proposer_id: Identifier::ZERO,
            parent_voter_ids: vec![],
            parent_voter_sig: vec![],
            proposer_sig: vec![],
        }
    }

    #[test]
    fn uncommitted_txn_is_not_visible() {
        let store = MemStateStore::new();
        let h = header(Identifier::ZERO, 0, 0);
        let mut txn = store.begin().unwrap();
        store.insert_header(&mut txn, &h).unwrap();
        // a fresh transaction, begun before commit, must not see the write
        let other = store.begin().unwrap();
        assert!(store.retrieve_header(&other, h.id()).unwrap().is_none());
        store.commit(txn).unwrap();
        let after = store.begin().unwrap();
        assert!(store.retrieve_header(&after, h.id()).unwrap().is_some());
    }

    #[test]
    fn reads_see_pending_writes_in_same_txn() {
        let store = MemStateStore::new();
        let h = header(Identifier::ZERO, 0, 0);
        let mut txn = store.begin().unwrap();
        store.insert_header(&mut txn, &h).unwrap();
        assert!(store.retrieve_header(&txn, h.id()).unwrap().is_some());
    }
}
