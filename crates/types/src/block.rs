//! Block, payload, seal, execution result, and service-event models (§3, §4.B).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{Canonical, Decoder, Encoder, EntityTag};
use crate::error::{BlockError, CodecError};
use crate::hash::hash32;
use crate::identity::codec_ext::{
    decode_clusters, decode_identity_list, encode_clusters, encode_identity_list,
};
use crate::identity::{Clusters, IdentityList};
use crate::Identifier;

/// A 32-byte commitment to the state produced by an execution result.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateCommitment(pub [u8; 32]);

impl std::fmt::Debug for StateCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateCommitment({})", hex::encode(self.0))
    }
}

fn read_commitment(dec: &mut Decoder<'_>) -> Result<StateCommitment, CodecError> {
    let bytes = dec.decode_bytes()?;
    let arr = <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| CodecError::InvalidEntity("state commitment not 32 bytes".to_string()))?;
    Ok(StateCommitment(arr))
}

fn read_identifier(dec: &mut Decoder<'_>) -> Result<Identifier, CodecError> {
    let bytes = dec.decode_bytes()?;
    let arr = <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| CodecError::InvalidEntity("identifier not 32 bytes".to_string()))?;
    Ok(Identifier::from(arr))
}

/// A quorum certificate over a cluster's terminal block, supplied by
/// `EpochCommit` once per cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub block_id: Identifier,
    pub view: u64,
    pub signer_ids: Vec<Identifier>,
    pub signature: Vec<u8>,
}

fn encode_qc(enc: &mut Encoder, qc: &QuorumCertificate) {
    enc.encode_bytes(qc.block_id.as_bytes());
    enc.encode_u64(qc.view);
    enc.encode_list(&qc.signer_ids, |e, id| { e.encode_bytes(id.as_bytes()); });
    enc.encode_bytes(&qc.signature);
}

fn decode_qc(dec: &mut Decoder<'_>) -> Result<QuorumCertificate, CodecError> {
    let block_id = read_identifier(dec)?;
    let view = dec.decode_u64()?;
    let signer_ids = dec.decode_list(read_identifier)?;
    let signature = dec.decode_bytes()?;
    Ok(QuorumCertificate { block_id, view, signer_ids, signature })
}

/// A DKG key share and index published for one consensus participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgParticipant {
    pub key_share: Vec<u8>,
    pub index: u32,
}

/// `EpochSetup { ... } | EpochCommit { ... }` — a sealed tagged union; the
/// extension validator matches it exhaustively rather than inspecting an
/// untyped envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceEvent {
    EpochSetup {
        counter: u64,
        final_view: u64,
        participants: IdentityList,
        assignments: Clusters,
        random_source: Vec<u8>,
    },
    EpochCommit {
        counter: u64,
        cluster_qcs: Vec<QuorumCertificate>,
        dkg_group_key: Vec<u8>,
        dkg_participants: BTreeMap<Identifier, DkgParticipant>,
    },
}

impl ServiceEvent {
    pub fn counter(&self) -> u64 {
        match self {
            Self::EpochSetup { counter, .. } => *counter,
            Self::EpochCommit { counter, .. } => *counter,
        }
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) {
        match self {
            Self::EpochSetup { counter, final_view, participants, assignments, random_source } => {
                enc.encode_u8(0);
                enc.encode_u64(*counter);
                enc.encode_u64(*final_view);
                encode_identity_list(enc, participants);
                encode_clusters(enc, assignments);
                enc.encode_bytes(random_source);
            }
            Self::EpochCommit { counter, cluster_qcs, dkg_group_key, dkg_participants } => {
                enc.encode_u8(1);
                enc.encode_u64(*counter);
                enc.encode_list(cluster_qcs, |e, qc| encode_qc(e, qc));
                enc.encode_bytes(dkg_group_key);
                let entries: Vec<_> = dkg_participants.iter().collect();
                enc.encode_list(&entries, |e, (node_id, participant)| {
                    e.encode_bytes(node_id.as_bytes());
                    e.encode_bytes(&participant.key_share);
                    e.encode_u32(participant.index);
                });
            }
        }
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        match dec.decode_u8()? {
            0 => {
                let counter = dec.decode_u64()?;
                let final_view = dec.decode_u64()?;
                let participants = decode_identity_list(dec)?;
                let assignments = decode_clusters(dec)?;
                let random_source = dec.decode_bytes()?;
                Ok(Self::EpochSetup { counter, final_view, participants, assignments, random_source })
            }
            1 => {
                let counter = dec.decode_u64()?;
                let cluster_qcs = dec.decode_list(decode_qc)?;
                let dkg_group_key = dec.decode_bytes()?;
                let entries = dec.decode_list(|d| {
                    let node_id = read_identifier(d)?;
                    let key_share = d.decode_bytes()?;
                    let index = d.decode_u32()?;
                    Ok((node_id, DkgParticipant { key_share, index }))
                })?;
                Ok(Self::EpochCommit {
                    counter,
                    cluster_qcs,
                    dkg_group_key,
                    dkg_participants: entries.into_iter().collect(),
                })
            }
            other => Err(CodecError::InvalidEntity(format!("unknown service event tag {other}"))),
        }
    }
}

impl Canonical for ServiceEvent {
    fn entity_tag() -> EntityTag {
        EntityTag::ServiceEvent
    }

    fn encode_canonical(&self, enc: &mut Encoder) {
        self.encode(enc);
    }

    fn decode_canonical(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Self::decode(dec)
    }
}

/// A reference to a collection cluster's guaranteed batch of transactions.
/// Business rules for collection clusters are a consumer concern; this
/// state manager only checks uniqueness and ancestry of the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionGuarantee {
    pub collection_id: Identifier,
    pub reference_block_id: Identifier,
    pub signer_ids: Vec<Identifier>,
}

fn encode_guarantee(enc: &mut Encoder, g: &CollectionGuarantee) {
    enc.encode_bytes(g.collection_id.as_bytes());
    enc.encode_bytes(g.reference_block_id.as_bytes());
    enc.encode_list(&g.signer_ids, |e, id| { e.encode_bytes(id.as_bytes()); });
}

fn decode_guarantee(dec: &mut Decoder<'_>) -> Result<CollectionGuarantee, CodecError> {
    let collection_id = read_identifier(dec)?;
    let reference_block_id = read_identifier(dec)?;
    let signer_ids = dec.decode_list(read_identifier)?;
    Ok(CollectionGuarantee { collection_id, reference_block_id, signer_ids })
}

/// A single chunk's execution digest. Chunk-level verification is the
/// verification pipeline's concern; only `final_state` is consulted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub final_state: StateCommitment,
}

/// `{PreviousResultID, BlockID, Chunks, ServiceEvents}` — chains by
/// `previous_result_id`, paralleling the block chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub previous_result_id: Identifier,
    pub block_id: Identifier,
    pub chunks: Vec<Chunk>,
    pub service_events: Vec<ServiceEvent>,
}

impl ExecutionResult {
    /// The commitment produced after the last chunk, or the zero
    /// commitment if the result has no chunks (e.g. an empty root result).
    pub fn final_state_commitment(&self) -> StateCommitment {
        self.chunks
            .last()
            .map(|c| c.final_state)
            .unwrap_or(StateCommitment([0u8; 32]))
    }
}

impl Canonical for ExecutionResult {
    fn entity_tag() -> EntityTag {
        EntityTag::ExecutionResult
    }

    fn encode_canonical(&self, enc: &mut Encoder) {
        enc.encode_bytes(self.previous_result_id.as_bytes());
        enc.encode_bytes(self.block_id.as_bytes());
        enc.encode_list(&self.chunks, |e, c| { e.encode_bytes(&c.final_state.0); });
        enc.encode_list(&self.service_events, |e, ev| ev.encode(e));
    }

    fn decode_canonical(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let previous_result_id = read_identifier(dec)?;
        let block_id = read_identifier(dec)?;
        let chunks = dec.decode_list(|d| Ok(Chunk { final_state: read_commitment(d)? }))?;
        let service_events = dec.decode_list(ServiceEvent::decode)?;
        Ok(Self { previous_result_id, block_id, chunks, service_events })
    }
}

/// An attestation that `result_id` for `block_id` produced `final_state`
/// and carried `service_events`, in order.
///
/// `previous_state` is the state commitment this seal's result extends;
/// the extension validator requires it to chain from the previous seal on
/// the same fork (§4.F step 8). It is not part of the distilled data model
/// table but is required to implement that check literally; see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    pub block_id: Identifier,
    pub result_id: Identifier,
    pub previous_state: StateCommitment,
    pub final_state: StateCommitment,
    pub aggregated_approval_sigs: Vec<u8>,
    pub service_events: Vec<ServiceEvent>,
}

impl Seal {
    /// Depends on all fields including `service_events`, in order.
    pub fn id(&self) -> Identifier {
        Identifier::from(hash32(b"seal", &self.to_bytes_canonical()))
    }
}

impl Canonical for Seal {
    fn entity_tag() -> EntityTag {
        EntityTag::Seal
    }

    fn encode_canonical(&self, enc: &mut Encoder) {
        enc.encode_bytes(self.block_id.as_bytes());
        enc.encode_bytes(self.result_id.as_bytes());
        enc.encode_bytes(&self.previous_state.0);
        enc.encode_bytes(&self.final_state.0);
        enc.encode_bytes(&self.aggregated_approval_sigs);
        enc.encode_list(&self.service_events, |e, ev| ev.encode(e));
    }

    fn decode_canonical(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let block_id = read_identifier(dec)?;
        let result_id = read_identifier(dec)?;
        let previous_state = read_commitment(dec)?;
        let final_state = read_commitment(dec)?;
        let aggregated_approval_sigs = dec.decode_bytes()?;
        let service_events = dec.decode_list(ServiceEvent::decode)?;
        Ok(Self {
            block_id,
            result_id,
            previous_state,
            final_state,
            aggregated_approval_sigs,
            service_events,
        })
    }
}

/// `{Guarantees, Seals, Receipts, Results}`. `Receipts` are a pure routing
/// artifact for execution-result gossip; since the core never inspects
/// them (only `Results`, which carry the service events that matter to
/// it), they are not modeled as a distinct field here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Payload {
    pub guarantees: Vec<CollectionGuarantee>,
    pub seals: Vec<Seal>,
    pub results: Vec<ExecutionResult>,
}

impl Canonical for Payload {
    fn entity_tag() -> EntityTag {
        EntityTag::Payload
    }

    fn encode_canonical(&self, enc: &mut Encoder) {
        enc.encode_list(&self.guarantees, |e, g| encode_guarantee(e, g));
        enc.encode_list(&self.seals, |e, s| s.encode_canonical(e));
        enc.encode_list(&self.results, |e, r| r.encode_canonical(e));
    }

    fn decode_canonical(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let guarantees = dec.decode_list(decode_guarantee)?;
        let seals = dec.decode_list(Seal::decode_canonical)?;
        let results = dec.decode_list(ExecutionResult::decode_canonical)?;
        Ok(Self { guarantees, seals, results })
    }
}

impl Payload {
    /// Deterministic over ordered fields.
    pub fn hash(&self) -> Identifier {
        Identifier::from(hash32(b"payload", &self.to_bytes_canonical()))
    }
}

/// `{ChainID, ParentID, Height, View, Timestamp, PayloadHash, ProposerID,
/// ParentVoterIDs, ParentVoterSig, ProposerSig}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub parent_id: Identifier,
    pub height: u64,
    pub view: u64,
    pub timestamp: u64,
    pub payload_hash: Identifier,
    pub proposer_id: Identifier,
    pub parent_voter_ids: Vec<Identifier>,
    pub parent_voter_sig: Vec<u8>,
    pub proposer_sig: Vec<u8>,
}

impl Canonical for Header {
    fn entity_tag() -> EntityTag {
        EntityTag::Header
    }

    fn encode_canonical(&self, enc: &mut Encoder) {
        enc.encode_bytes(self.chain_id.as_bytes());
        enc.encode_bytes(self.parent_id.as_bytes());
        enc.encode_u64(self.height);
        enc.encode_u64(self.view);
        enc.encode_u64(self.timestamp);
        enc.encode_bytes(self.payload_hash.as_bytes());
        enc.encode_bytes(self.proposer_id.as_bytes());
        enc.encode_list(&self.parent_voter_ids, |e, id| { e.encode_bytes(id.as_bytes()); });
        enc.encode_bytes(&self.parent_voter_sig);
        enc.encode_bytes(&self.proposer_sig);
    }

    fn decode_canonical(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let chain_id = String::from_utf8(dec.decode_bytes()?)
            .map_err(|_| CodecError::InvalidEntity("chain_id not utf8".to_string()))?;
        let parent_id = read_identifier(dec)?;
        let height = dec.decode_u64()?;
        let view = dec.decode_u64()?;
        let timestamp = dec.decode_u64()?;
        let payload_hash = read_identifier(dec)?;
        let proposer_id = read_identifier(dec)?;
        let parent_voter_ids = dec.decode_list(read_identifier)?;
        let parent_voter_sig = dec.decode_bytes()?;
        let proposer_sig = dec.decode_bytes()?;
        Ok(Self {
            chain_id,
            parent_id,
            height,
            view,
            timestamp,
            payload_hash,
            proposer_id,
            parent_voter_ids,
            parent_voter_sig,
            proposer_sig,
        })
    }
}

impl Header {
    /// The hash of the canonical encoding, including the payload hash and
    /// both signature fields.
    pub fn id(&self) -> Identifier {
        Identifier::from(hash32(b"header", &self.to_bytes_canonical()))
    }
}

/// A header paired with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub payload: Payload,
}

impl Block {
    /// Fails with `PayloadHashMismatch` if the header's recorded payload
    /// hash does not match the payload actually attached.
    pub fn valid_structure(&self) -> Result<(), BlockError> {
        if self.header.payload_hash != self.payload.hash() {
            return Err(BlockError::PayloadHashMismatch);
        }
        Ok(())
    }

    pub fn id(&self) -> Identifier {
        self.header.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, Role};

    fn sample_header(payload_hash: Identifier) -> Header {
        Header {
            chain_id: "test-chain".to_string(),
            parent_id: Identifier::ZERO,
            height: 0,
            view: 0,
            timestamp: 0,
            payload_hash,
            proposer_id: Identifier::from_byte(1),
            parent_voter_ids: vec![Identifier::from_byte(9)],
            parent_voter_sig: vec![1, 2, 3],
            proposer_sig: vec![4, 5, 6],
        }
    }

    #[test]
    fn valid_structure_accepts_matching_hash() {
        let payload = Payload::default();
        let block = Block { header: sample_header(payload.hash()), payload };
        assert!(block.valid_structure().is_ok());
    }

    #[test]
    fn valid_structure_rejects_mismatched_hash() {
        let payload = Payload::default();
        let block = Block { header: sample_header(Identifier::ZERO), payload };
        assert_eq!(block.valid_structure(), Err(BlockError::PayloadHashMismatch));
    }

    #[test]
    fn header_id_changes_with_any_field() {
        let h1 = sample_header(Identifier::ZERO);
        let mut h2 = h1.clone();
        h2.view = 1;
        assert_ne!(h1.id(), h2.id());
    }

    #[test]
    fn header_round_trips_through_canonical_codec() {
        let header = sample_header(Identifier::from_byte(7));
        let bytes = header.to_bytes_canonical();
        let decoded = Header::from_bytes_canonical(&bytes).unwrap();
        assert_eq!(header, decoded);
    }

    fn identity(id: u8) -> Identity {
        Identity {
            node_id: Identifier::from_byte(id),
            address: format!("node-{id}"),
            role: Role::Consensus,
            stake: 1,
            network_pub_key: vec![id; 4],
            staking_pub_key: vec![id; 4],
        }
    }

    #[test]
    fn seal_with_setup_event_round_trips() {
        let participants = IdentityList::canonical(vec![identity(1)]).unwrap();
        let assignments = Clusters::partition(&IdentityList::canonical(vec![]).unwrap(), vec![])
            .unwrap();
        let seal = Seal {
            block_id: Identifier::from_byte(1),
            result_id: Identifier::from_byte(2),
            previous_state: StateCommitment([0u8; 32]),
            final_state: StateCommitment([1u8; 32]),
            aggregated_approval_sigs: vec![9, 9],
            service_events: vec![ServiceEvent::EpochSetup {
                counter: 1,
                final_view: 1000,
                participants,
                assignments,
                random_source: vec![1, 2, 3],
            }],
        };
        let bytes = seal.to_bytes_canonical();
        let decoded = Seal::from_bytes_canonical(&bytes).unwrap();
        assert_eq!(seal, decoded);
    }

    #[test]
    fn seal_id_depends_on_service_events() {
        let base = Seal {
            block_id: Identifier::from_byte(1),
            result_id: Identifier::from_byte(2),
            previous_state: StateCommitment([0u8; 32]),
            final_state: StateCommitment([1u8; 32]),
            aggregated_approval_sigs: vec![],
            service_events: vec![],
        };
        let mut with_event = base.clone();
        with_event.service_events.push(ServiceEvent::EpochSetup {
            counter: 1,
            final_view: 1000,
            participants: IdentityList::canonical(vec![]).unwrap(),
            assignments: Clusters::partition(&IdentityList::canonical(vec![]).unwrap(), vec![])
                .unwrap(),
            random_source: vec![1, 2, 3],
        });
        assert_ne!(base.id(), with_event.id());
    }

    #[test]
    fn decode_of_random_bytes_does_not_panic() {
        for seed in 0u8..=255 {
            let bytes: Vec<u8> = (0..40).map(|i| seed.wrapping_mul(i + 3)).collect();
            let _ = Header::from_bytes_canonical(&bytes);
        }
    }
}
