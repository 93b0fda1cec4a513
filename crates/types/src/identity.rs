//! Identities, roles, stake, and cluster partitioning (§4.A).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::Identifier;

/// The role a staked node plays in the protocol's disjoint sub-protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Collection,
    Consensus,
    Execution,
    Verification,
    Access,
}

/// A single staked participant.
///
/// `Stake == 0` denotes an ejected identity: it is never present in a
/// canonicalized list, it is filtered out of every active-set view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub node_id: Identifier,
    pub address: String,
    pub role: Role,
    pub stake: u64,
    pub network_pub_key: Vec<u8>,
    pub staking_pub_key: Vec<u8>,
}

/// A canonically ordered, invariant-checked set of identities.
///
/// Canonical order is ascending `node_id`; this is the order every
/// encoding, hashing, and iteration over an `IdentityList` uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityList(Vec<Identity>);

impl IdentityList {
    /// Builds a canonical list, failing on any violated invariant.
    ///
    /// Zero-stake identities are rejected here rather than silently
    /// dropped: a zero-stake entry in a *proposed* list is a caller bug,
    /// not a legitimate "ejected" identity (those are simply absent).
    pub fn canonical(mut list: Vec<Identity>) -> Result<Self, IdentityError> {
        let mut seen_ids = BTreeSet::new();
        let mut seen_addrs = BTreeSet::new();
        for identity in &list {
            if identity.stake == 0 {
                return Err(IdentityError::ZeroStake);
            }
            if !seen_ids.insert(identity.node_id) {
                return Err(IdentityError::DuplicateNodeID);
            }
            if !seen_addrs.insert(identity.address.clone()) {
                return Err(IdentityError::DuplicateAddress);
            }
        }
        list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(Self(list))
    }

    pub fn as_slice(&self) -> &[Identity] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.0.iter()
    }

    pub fn get(&self, node_id: Identifier) -> Option<&Identity> {
        self.0.iter().find(|i| i.node_id == node_id)
    }

    /// Filters by role, preserving canonical order. A total function: an
    /// empty result is valid, never an error.
    pub fn filter_role(&self, role: Role) -> IdentityList {
        IdentityList(self.0.iter().filter(|i| i.role == role).cloned().collect())
    }
}

/// A partition of collection nodes into disjoint clusters, used to route
/// collection-cluster traffic once an `EpochSetup` assigns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clusters(Vec<Vec<Identifier>>);

impl Clusters {
    /// Partitions `collectors` according to `assignments`: every collector
    /// must appear in exactly one cluster.
    pub fn partition(
        collectors: &IdentityList,
        assignments: Vec<Vec<Identifier>>,
    ) -> Result<Self, IdentityError> {
        let mut assigned = BTreeSet::new();
        for cluster in &assignments {
            for node_id in cluster {
                if !assigned.insert(*node_id) {
                    return Err(IdentityError::DuplicateClusterMember);
                }
            }
        }
        for identity in collectors.iter() {
            if !assigned.contains(&identity.node_id) {
                return Err(IdentityError::UnassignedCollector);
            }
        }
        Ok(Self(assignments))
    }

    pub fn as_slice(&self) -> &[Vec<Identifier>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Canonical, invariant-preserving encode/decode helpers for the embedded
/// structures used inside `ServiceEvent`. These are not top-level tagged
/// entities (they never appear bare in storage), so they take a plain
/// `Encoder`/`Decoder` rather than wrapping themselves in an entity tag.
pub mod codec_ext {
    use super::*;
    use crate::codec::{Decoder, Encoder};
    use crate::error::CodecError;

    fn role_to_u8(role: Role) -> u8 {
        match role {
            Role::Collection => 0,
            Role::Consensus => 1,
            Role::Execution => 2,
            Role::Verification => 3,
            Role::Access => 4,
        }
    }

    fn role_from_u8(tag: u8) -> Result<Role, CodecError> {
        Ok(match tag {
            0 => Role::Collection,
            1 => Role::Consensus,
            2 => Role::Execution,
            3 => Role::Verification,
            4 => Role::Access,
            _ => return Err(CodecError::InvalidEntity("unknown role tag".to_string())),
        })
    }

    pub fn encode_identity(enc: &mut Encoder, identity: &Identity) {
        enc.encode_bytes(identity.node_id.as_bytes());
        enc.encode_bytes(identity.address.as_bytes());
        enc.encode_u8(role_to_u8(identity.role));
        enc.encode_u64(identity.stake);
        enc.encode_bytes(&identity.network_pub_key);
        enc.encode_bytes(&identity.staking_pub_key);
    }

    pub fn decode_identity(dec: &mut Decoder<'_>) -> Result<Identity, CodecError> {
        let node_id = Identifier::from(
            <[u8; 32]>::try_from(dec.decode_bytes()?.as_slice())
                .map_err(|_| CodecError::InvalidEntity("node_id not 32 bytes".to_string()))?,
        );
        let address = String::from_utf8(dec.decode_bytes()?)
            .map_err(|_| CodecError::InvalidEntity("address not utf8".to_string()))?;
        let role = role_from_u8(dec.decode_u8()?)?;
        let stake = dec.decode_u64()?;
        let network_pub_key = dec.decode_bytes()?;
        let staking_pub_key = dec.decode_bytes()?;
        Ok(Identity { node_id, address, role, stake, network_pub_key, staking_pub_key })
    }

    pub fn encode_identity_list(enc: &mut Encoder, list: &IdentityList) {
        enc.encode_list(list.as_slice(), |e, identity| encode_identity(e, identity));
    }

    pub fn decode_identity_list(dec: &mut Decoder<'_>) -> Result<IdentityList, CodecError> {
        let items = dec.decode_list(decode_identity)?;
        IdentityList::canonical(items)
            .map_err(|e| CodecError::InvalidEntity(format!("identity list: {e}")))
    }

    pub fn encode_clusters(enc: &mut Encoder, clusters: &Clusters) {
        enc.encode_list(clusters.as_slice(), |e, cluster| {
            e.encode_list(cluster, |e2, id| { e2.encode_bytes(id.as_bytes()); });
        });
    }

    pub fn decode_clusters(dec: &mut Decoder<'_>) -> Result<Clusters, CodecError> {
        let clusters = dec.decode_list(|d| {
            d.decode_list(|d2| {
                let bytes = d2.decode_bytes()?;
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| CodecError::InvalidEntity("node id not 32 bytes".to_string()))?;
                Ok(Identifier::from(arr))
            })
        })?;
        Ok(Clusters(clusters))
    }
}
