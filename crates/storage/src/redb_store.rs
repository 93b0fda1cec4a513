//! A durable `StateStore` backed by `redb`.
//!
//! Mirrors the teacher's `redb_epoch_store` shape: one `TableDefinition`
//! per index, big-endian keys for ordered scans, and a single exclusive
//! writer. Unlike that store (which opens one long-lived `WriteTransaction`
//! directly), this implementation buffers a transaction's operations in
//! memory and flushes them as one redb write on `commit` — the trait's
//! `Txn` type has no borrow on `self`, which a live `redb::WriteTransaction`
//! would require. Reads inside an open transaction first consult the
//! buffered operations, then fall through to the last committed value.

use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use protocol_api::storage::{StateStore, StorageError, Txn as TxnMarker};
use protocol_types::codec::Canonical;
use protocol_types::{ExecutionResult, Header, Identifier, Payload, Phase, Seal, ServiceEvent};

const HEADERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("headers");
const HEIGHT_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("height_index");
const PAYLOADS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("payloads");
const SEALS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("seals");
const BLOCK_SEAL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("block_seal");
const FORK_LATEST_SEAL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("fork_latest_seal");
const EXECUTION_RESULTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("execution_results");
const SERVICE_EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("service_events");
const SCALARS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("scalars");
const EPOCH_COUNTER_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("epoch_counter_idx");
const PHASE_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("phase_idx");
const NEXT_SETUP_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("next_setup_idx");
const NEXT_COMMIT_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("next_commit_idx");
const CURRENT_SETUP_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("current_setup_idx");
const CURRENT_COMMIT_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("current_commit_idx");
const PREVIOUS_SETUP_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("previous_setup_idx");
const PREVIOUS_COMMIT_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("previous_commit_idx");

const SCALAR_FINALIZED_HEIGHT: &[u8] = b"finalized_height";
const SCALAR_SEALED_HEIGHT: &[u8] = b"sealed_height";
const SCALAR_BOUNDARY: &[u8] = b"boundary";

fn be64(x: u64) -> [u8; 8] {
    x.to_be_bytes()
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn execution_result_id(result: &ExecutionResult) -> Identifier {
    let mut enc = protocol_types::codec::Encoder::new();
    enc.encode_bytes(result.block_id.as_bytes());
    enc.encode_bytes(result.previous_result_id.as_bytes());
    Identifier::from(protocol_types::hash::hash32(b"execution_result", &enc.finish()))
}

fn phase_to_u8(phase: Phase) -> u8 {
    match phase {
        Phase::Staking => 0,
        Phase::Setup => 1,
        Phase::Committed => 2,
    }
}

fn phase_from_u8(tag: u8) -> Result<Phase, StorageError> {
    Ok(match tag {
        0 => Phase::Staking,
        1 => Phase::Setup,
        2 => Phase::Committed,
        other => return Err(StorageError::Decode(format!("unknown phase tag {other}"))),
    })
}

/// A write recorded against an open `RedbTxn`, applied atomically to the
/// database on `commit`.
#[derive(Debug, Clone)]
enum Op {
    InsertHeader(Header),
    IndexByHeight(u64, Identifier),
    InsertPayload(Identifier, Payload),
    InsertSeal(Seal),
    IndexForkLatestSeal(Identifier, Identifier),
    InsertExecutionResult(ExecutionResult),
    InsertServiceEvent(Identifier, ServiceEvent),
    UpdateFinalizedHeight(u64),
    UpdateSealedHeight(u64),
    UpdateBoundary(u64),
    IndexEpochCounter(Identifier, u64),
    IndexPhase(Identifier, Phase),
    IndexNextEpochSetup(Identifier, Identifier),
    IndexNextEpochCommit(Identifier, Identifier),
    IndexCurrentEpochSetup(Identifier, Identifier),
    IndexCurrentEpochCommit(Identifier, Identifier),
    IndexPreviousEpochSetup(Identifier, Identifier),
    IndexPreviousEpochCommit(Identifier, Identifier),
}

/// A buffered transaction. Reads walk `ops` most-recent-first before
/// falling through to the database.
#[derive(Debug, Default)]
pub struct RedbTxn {
    ops: Vec<Op>,
}

impl TxnMarker for RedbTxn {}

pub struct RedbStateStore {
    db: Arc<Database>,
}

impl RedbStateStore {
    /// Opens (creating if absent) a redb database at `path` and ensures
    /// every table exists.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(backend_err)?;
        {
            let txn = db.begin_write().map_err(backend_err)?;
            for table in [
                HEADERS,
                HEIGHT_INDEX,
                PAYLOADS,
                SEALS,
                BLOCK_SEAL,
                FORK_LATEST_SEAL,
                EXECUTION_RESULTS,
                SERVICE_EVENTS,
                SCALARS,
                EPOCH_COUNTER_IDX,
                PHASE_IDX,
                NEXT_SETUP_IDX,
                NEXT_COMMIT_IDX,
                CURRENT_SETUP_IDX,
                CURRENT_COMMIT_IDX,
                PREVIOUS_SETUP_IDX,
                PREVIOUS_COMMIT_IDX,
            ] {
                txn.open_table(table).map_err(backend_err)?;
            }
            txn.commit().map_err(backend_err)?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    fn get_raw(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let read = self.db.begin_read().map_err(backend_err)?;
        let handle = match read.open_table(table) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(backend_err(e)),
        };
        let result = handle.get(key).map_err(backend_err)?.map(|v| v.value().to_vec());
        Ok(result)
    }

    fn flush(&self, ops: Vec<Op>) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut headers = txn.open_table(HEADERS).map_err(backend_err)?;
            let mut height_index = txn.open_table(HEIGHT_INDEX).map_err(backend_err)?;
            let mut payloads = txn.open_table(PAYLOADS).map_err(backend_err)?;
            let mut seals = txn.open_table(SEALS).map_err(backend_err)?;
            let mut block_seal = txn.open_table(BLOCK_SEAL).map_err(backend_err)?;
            let mut fork_latest_seal = txn.open_table(FORK_LATEST_SEAL).map_err(backend_err)?;
            let mut execution_results = txn.open_table(EXECUTION_RESULTS).map_err(backend_err)?;
            let mut service_events = txn.open_table(SERVICE_EVENTS).map_err(backend_err)?;
            let mut scalars = txn.open_table(SCALARS).map_err(backend_err)?;
            let mut epoch_counter_idx = txn.open_table(EPOCH_COUNTER_IDX).map_err(backend_err)?;
            let mut phase_idx = txn.open_table(PHASE_IDX).map_err(backend_err)?;
            let mut next_setup_idx = txn.open_table(NEXT_SETUP_IDX).map_err(backend_err)?;
            let mut next_commit_idx = txn.open_table(NEXT_COMMIT_IDX).map_err(backend_err)?;
            let mut current_setup_idx = txn.open_table(CURRENT_SETUP_IDX).map_err(backend_err)?;
            let mut current_commit_idx = txn.open_table(CURRENT_COMMIT_IDX).map_err(backend_err)?;
            let mut previous_setup_idx = txn.open_table(PREVIOUS_SETUP_IDX).map_err(backend_err)?;
            let mut previous_commit_idx = txn.open_table(PREVIOUS_COMMIT_IDX).map_err(backend_err)?;

            for op in ops {
                match op {
                    Op::InsertHeader(header) => {
                        headers
                            .insert(header.id().as_bytes().as_slice(), header.to_bytes_canonical().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexByHeight(height, id) => {
                        height_index
                            .insert(be64(height).as_slice(), id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::InsertPayload(block_id, payload) => {
                        payloads
                            .insert(block_id.as_bytes().as_slice(), payload.to_bytes_canonical().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::InsertSeal(seal) => {
                        let seal_id = seal.id();
                        block_seal
                            .insert(seal.block_id.as_bytes().as_slice(), seal_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                        seals
                            .insert(seal_id.as_bytes().as_slice(), seal.to_bytes_canonical().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexForkLatestSeal(block_id, seal_id) => {
                        fork_latest_seal
                            .insert(block_id.as_bytes().as_slice(), seal_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::InsertExecutionResult(result) => {
                        let id = execution_result_id(&result);
                        execution_results
                            .insert(id.as_bytes().as_slice(), result.to_bytes_canonical().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::InsertServiceEvent(event_id, event) => {
                        service_events
                            .insert(event_id.as_bytes().as_slice(), event.to_bytes_canonical().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::UpdateFinalizedHeight(height) => {
                        scalars
                            .insert(SCALAR_FINALIZED_HEIGHT, be64(height).as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::UpdateSealedHeight(height) => {
                        scalars
                            .insert(SCALAR_SEALED_HEIGHT, be64(height).as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::UpdateBoundary(height) => {
                        scalars.insert(SCALAR_BOUNDARY, be64(height).as_slice()).map_err(backend_err)?;
                    }
                    Op::IndexEpochCounter(block_id, counter) => {
                        epoch_counter_idx
                            .insert(block_id.as_bytes().as_slice(), be64(counter).as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexPhase(block_id, phase) => {
                        phase_idx
                            .insert(block_id.as_bytes().as_slice(), [phase_to_u8(phase)].as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexNextEpochSetup(block_id, event_id) => {
                        next_setup_idx
                            .insert(block_id.as_bytes().as_slice(), event_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexNextEpochCommit(block_id, event_id) => {
                        next_commit_idx
                            .insert(block_id.as_bytes().as_slice(), event_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexCurrentEpochSetup(block_id, event_id) => {
                        current_setup_idx
                            .insert(block_id.as_bytes().as_slice(), event_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexCurrentEpochCommit(block_id, event_id) => {
                        current_commit_idx
                            .insert(block_id.as_bytes().as_slice(), event_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexPreviousEpochSetup(block_id, event_id) => {
                        previous_setup_idx
                            .insert(block_id.as_bytes().as_slice(), event_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                    Op::IndexPreviousEpochCommit(block_id, event_id) => {
                        previous_commit_idx
                            .insert(block_id.as_bytes().as_slice(), event_id.as_bytes().as_slice())
                            .map_err(backend_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(backend_err)?;
        debug!(target: "protocol_storage", "flushed transaction to redb");
        Ok(())
    }

    /// Walks `ops` from the end looking for the most recent write
    /// matching `matcher`; returns `Some(None)` for a recorded tombstone
    /// (unused today, reserved for future delete support) or `Some(Some(v))`
    /// for a hit, `None` if the key was never touched this transaction.
    fn pending<T: Clone>(ops: &[Op], matcher: impl Fn(&Op) -> Option<T>) -> Option<T> {
        ops.iter().rev().find_map(matcher)
    }
}

impl StateStore for RedbStateStore {
    type Txn = RedbTxn;

    fn begin(&self) -> Result<Self::Txn, StorageError> {
        Ok(RedbTxn::default())
    }

    fn commit(&self, txn: Self::Txn) -> Result<(), StorageError> {
        self.flush(txn.ops)
    }

    fn insert_header(&self, txn: &mut Self::Txn, header: &Header) -> Result<(), StorageError> {
        txn.ops.push(Op::InsertHeader(header.clone()));
        Ok(())
    }

    fn retrieve_header(&self, txn: &Self::Txn, id: Identifier) -> Result<Option<Header>, StorageError> {
        if let Some(h) = Self::pending(&txn.ops, |op| match op {
            Op::InsertHeader(h) if h.id() == id => Some(h.clone()),
            _ => None,
        }) {
            return Ok(Some(h));
        }
        match self.get_raw(HEADERS, id.as_bytes())? {
            Some(bytes) => Ok(Some(Header::from_bytes_canonical(&bytes).map_err(|e| {
                StorageError::Decode(e.to_string())
            })?)),
            None => Ok(None),
        }
    }

    fn index_by_height(&self, txn: &mut Self::Txn, height: u64, id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexByHeight(height, id));
        Ok(())
    }

    fn lookup_by_height(&self, txn: &Self::Txn, height: u64) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexByHeight(h, id) if *h == height => Some(*id),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(HEIGHT_INDEX, &be64(height))? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("height index value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn insert_payload(&self, txn: &mut Self::Txn, block_id: Identifier, payload: &Payload) -> Result<(), StorageError> {
        txn.ops.push(Op::InsertPayload(block_id, payload.clone()));
        Ok(())
    }

    fn retrieve_payload(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Payload>, StorageError> {
        if let Some(p) = Self::pending(&txn.ops, |op| match op {
            Op::InsertPayload(id, p) if *id == block_id => Some(p.clone()),
            _ => None,
        }) {
            return Ok(Some(p));
        }
        match self.get_raw(PAYLOADS, block_id.as_bytes())? {
            Some(bytes) => Ok(Some(
                Payload::from_bytes_canonical(&bytes).map_err(|e| StorageError::Decode(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn insert_seal(&self, txn: &mut Self::Txn, seal: &Seal) -> Result<(), StorageError> {
        txn.ops.push(Op::InsertSeal(seal.clone()));
        Ok(())
    }

    fn lookup_block_seal(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::InsertSeal(s) if s.block_id == block_id => Some(s.id()),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(BLOCK_SEAL, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("block_seal value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn retrieve_seal(&self, txn: &Self::Txn, seal_id: Identifier) -> Result<Option<Seal>, StorageError> {
        if let Some(s) = Self::pending(&txn.ops, |op| match op {
            Op::InsertSeal(s) if s.id() == seal_id => Some(s.clone()),
            _ => None,
        }) {
            return Ok(Some(s));
        }
        match self.get_raw(SEALS, seal_id.as_bytes())? {
            Some(bytes) => {
                Ok(Some(Seal::from_bytes_canonical(&bytes).map_err(|e| StorageError::Decode(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    fn index_fork_latest_seal(&self, txn: &mut Self::Txn, block_id: Identifier, seal_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexForkLatestSeal(block_id, seal_id));
        Ok(())
    }

    fn lookup_fork_latest_seal(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexForkLatestSeal(b, s) if *b == block_id => Some(*s),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(FORK_LATEST_SEAL, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("fork_latest_seal value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn insert_execution_result(&self, txn: &mut Self::Txn, result: &ExecutionResult) -> Result<(), StorageError> {
        txn.ops.push(Op::InsertExecutionResult(result.clone()));
        Ok(())
    }

    fn retrieve_execution_result(
        &self,
        txn: &Self::Txn,
        result_id: Identifier,
    ) -> Result<Option<ExecutionResult>, StorageError> {
        if let Some(r) = Self::pending(&txn.ops, |op| match op {
            Op::InsertExecutionResult(r) if execution_result_id(r) == result_id => Some(r.clone()),
            _ => None,
        }) {
            return Ok(Some(r));
        }
        match self.get_raw(EXECUTION_RESULTS, result_id.as_bytes())? {
            Some(bytes) => Ok(Some(
                ExecutionResult::from_bytes_canonical(&bytes).map_err(|e| StorageError::Decode(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn insert_service_event(
        &self,
        txn: &mut Self::Txn,
        event_id: Identifier,
        event: &ServiceEvent,
    ) -> Result<(), StorageError> {
        txn.ops.push(Op::InsertServiceEvent(event_id, event.clone()));
        Ok(())
    }

    fn retrieve_service_event(&self, txn: &Self::Txn, event_id: Identifier) -> Result<Option<ServiceEvent>, StorageError> {
        if let Some(e) = Self::pending(&txn.ops, |op| match op {
            Op::InsertServiceEvent(id, e) if *id == event_id => Some(e.clone()),
            _ => None,
        }) {
            return Ok(Some(e));
        }
        match self.get_raw(SERVICE_EVENTS, event_id.as_bytes())? {
            Some(bytes) => Ok(Some(
                ServiceEvent::from_bytes_canonical(&bytes).map_err(|e| StorageError::Decode(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn retrieve_finalized_height(&self, txn: &Self::Txn) -> Result<u64, StorageError> {
        if let Some(h) = Self::pending(&txn.ops, |op| match op {
            Op::UpdateFinalizedHeight(h) => Some(*h),
            _ => None,
        }) {
            return Ok(h);
        }
        Ok(self
            .get_raw(SCALARS, SCALAR_FINALIZED_HEIGHT)?
            .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
            .unwrap_or(0))
    }

    fn update_finalized_height(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError> {
        txn.ops.push(Op::UpdateFinalizedHeight(height));
        Ok(())
    }

    fn retrieve_sealed_height(&self, txn: &Self::Txn) -> Result<u64, StorageError> {
        if let Some(h) = Self::pending(&txn.ops, |op| match op {
            Op::UpdateSealedHeight(h) => Some(*h),
            _ => None,
        }) {
            return Ok(h);
        }
        Ok(self
            .get_raw(SCALARS, SCALAR_SEALED_HEIGHT)?
            .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
            .unwrap_or(0))
    }

    fn update_sealed_height(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError> {
        txn.ops.push(Op::UpdateSealedHeight(height));
        Ok(())
    }

    fn retrieve_boundary(&self, txn: &Self::Txn) -> Result<u64, StorageError> {
        if let Some(h) = Self::pending(&txn.ops, |op| match op {
            Op::UpdateBoundary(h) => Some(*h),
            _ => None,
        }) {
            return Ok(h);
        }
        Ok(self
            .get_raw(SCALARS, SCALAR_BOUNDARY)?
            .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
            .unwrap_or(0))
    }

    fn update_boundary(&self, txn: &mut Self::Txn, height: u64) -> Result<(), StorageError> {
        txn.ops.push(Op::UpdateBoundary(height));
        Ok(())
    }

    fn index_epoch_counter(&self, txn: &mut Self::Txn, block_id: Identifier, counter: u64) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexEpochCounter(block_id, counter));
        Ok(())
    }

    fn lookup_epoch_counter(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<u64>, StorageError> {
        if let Some(c) = Self::pending(&txn.ops, |op| match op {
            Op::IndexEpochCounter(id, c) if *id == block_id => Some(*c),
            _ => None,
        }) {
            return Ok(Some(c));
        }
        Ok(self
            .get_raw(EPOCH_COUNTER_IDX, block_id.as_bytes())?
            .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8]))))
    }

    fn index_phase(&self, txn: &mut Self::Txn, block_id: Identifier, phase: Phase) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexPhase(block_id, phase));
        Ok(())
    }

    fn lookup_phase(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Phase>, StorageError> {
        if let Some(p) = Self::pending(&txn.ops, |op| match op {
            Op::IndexPhase(id, p) if *id == block_id => Some(*p),
            _ => None,
        }) {
            return Ok(Some(p));
        }
        match self.get_raw(PHASE_IDX, block_id.as_bytes())? {
            Some(bytes) if !bytes.is_empty() => Ok(Some(phase_from_u8(bytes[0])?)),
            _ => Ok(None),
        }
    }

    fn index_next_epoch_setup(&self, txn: &mut Self::Txn, block_id: Identifier, event_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexNextEpochSetup(block_id, event_id));
        Ok(())
    }

    fn lookup_next_epoch_setup(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexNextEpochSetup(b, e) if *b == block_id => Some(*e),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(NEXT_SETUP_IDX, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("next_setup_idx value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn index_next_epoch_commit(&self, txn: &mut Self::Txn, block_id: Identifier, event_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexNextEpochCommit(block_id, event_id));
        Ok(())
    }

    fn lookup_next_epoch_commit(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexNextEpochCommit(b, e) if *b == block_id => Some(*e),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(NEXT_COMMIT_IDX, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("next_commit_idx value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn index_current_epoch_setup(&self, txn: &mut Self::Txn, block_id: Identifier, event_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexCurrentEpochSetup(block_id, event_id));
        Ok(())
    }

    fn lookup_current_epoch_setup(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexCurrentEpochSetup(b, e) if *b == block_id => Some(*e),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(CURRENT_SETUP_IDX, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("current_setup_idx value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn index_current_epoch_commit(&self, txn: &mut Self::Txn, block_id: Identifier, event_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexCurrentEpochCommit(block_id, event_id));
        Ok(())
    }

    fn lookup_current_epoch_commit(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexCurrentEpochCommit(b, e) if *b == block_id => Some(*e),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(CURRENT_COMMIT_IDX, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("current_commit_idx value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn index_previous_epoch_setup(&self, txn: &mut Self::Txn, block_id: Identifier, event_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexPreviousEpochSetup(block_id, event_id));
        Ok(())
    }

    fn lookup_previous_epoch_setup(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexPreviousEpochSetup(b, e) if *b == block_id => Some(*e),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(PREVIOUS_SETUP_IDX, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("previous_setup_idx value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }

    fn index_previous_epoch_commit(&self, txn: &mut Self::Txn, block_id: Identifier, event_id: Identifier) -> Result<(), StorageError> {
        txn.ops.push(Op::IndexPreviousEpochCommit(block_id, event_id));
        Ok(())
    }

    fn lookup_previous_epoch_commit(&self, txn: &Self::Txn, block_id: Identifier) -> Result<Option<Identifier>, StorageError> {
        if let Some(id) = Self::pending(&txn.ops, |op| match op {
            Op::IndexPreviousEpochCommit(b, e) if *b == block_id => Some(*e),
            _ => None,
        }) {
            return Ok(Some(id));
        }
        match self.get_raw(PREVIOUS_COMMIT_IDX, block_id.as_bytes())? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StorageError::Decode("previous_commit_idx value not 32 bytes".into()))?;
                Ok(Some(Identifier::from(arr)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_types::Payload;

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
    fn header_persists_across_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStateStore::open(dir.path().join("state.redb")).unwrap();
        let h = header(Identifier::ZERO, 0, 0);
        let mut txn = store.begin().unwrap();
        store.insert_header(&mut txn, &h).unwrap();
        store.commit(txn).unwrap();

        let read = store.begin().unwrap();
        let fetched = store.retrieve_header(&read, h.id()).unwrap().unwrap();
        assert_eq!(fetched, h);
    }

    #[test]
    fn finalized_height_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStateStore::open(dir.path().join("state.redb")).unwrap();
        let txn = store.begin().unwrap();
        assert_eq!(store.retrieve_finalized_height(&txn).unwrap(), 0);
    }
}
