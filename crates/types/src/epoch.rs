//! Derived epoch and phase views (§3).

use serde::{Deserialize, Serialize};

use crate::block::{DkgParticipant, QuorumCertificate};
use crate::identity::{Clusters, IdentityList};
use crate::Identifier;

/// Position of a fork within its current epoch, with respect to the next
/// epoch's setup/commit status. Transitions are monotone:
/// `Staking -> Setup -> Committed -> (epoch+1) Staking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Staking,
    Setup,
    Committed,
}

/// A contiguous view range with a fixed identity set and DKG, derived from
/// an `EpochSetup`/`EpochCommit` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub counter: u64,
    pub first_view: u64,
    pub final_view: u64,
    pub initial_identities: IdentityList,
    pub clustering: Clusters,
    pub dkg: Option<Dkg>,
    pub random_source: Vec<u8>,
}

/// The published DKG result for an epoch, available once its
/// `EpochCommit` has been observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dkg {
    pub group_key: Vec<u8>,
    pub cluster_qcs: Vec<QuorumCertificate>,
    pub participants: std::collections::BTreeMap<Identifier, DkgParticipant>,
}
