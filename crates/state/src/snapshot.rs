//! Read-only state queries anchored to a single reference block (§4.E).
//! Every method is lazy: nothing is precomputed at construction, each
//! query walks exactly as far back as it needs to.

use protocol_api::storage::StateStore;
use protocol_types::{
    Dkg, Epoch, Header, Identifier, Identity, IdentityList, Phase, Role, Seal, ServiceEvent,
    StateCommitment,
};

use crate::error::ProtocolError;
use crate::support::seal_of_block;

/// A view of protocol state as of one specific block.
pub struct Snapshot<'a, S: StateStore> {
    store: &'a S,
    block_id: Identifier,
}

impl<'a, S: StateStore> Snapshot<'a, S> {
    pub fn new(store: &'a S, block_id: Identifier) -> Result<Self, ProtocolError> {
        let txn = store.begin()?;
        if store.retrieve_header(&txn, block_id)?.is_none() {
            return Err(ProtocolError::NotFound);
        }
        Ok(Self { store, block_id })
    }

    pub fn head(&self) -> Result<Header, ProtocolError> {
        let txn = self.store.begin()?;
        self.store.retrieve_header(&txn, self.block_id)?.ok_or(ProtocolError::NotFound)
    }

    pub fn phase(&self) -> Result<Phase, ProtocolError> {
        let txn = self.store.begin()?;
        self.store.lookup_phase(&txn, self.block_id)?.ok_or(ProtocolError::NotFound)
    }

    /// The seal of the most recently sealed block reachable from here, or
    /// `None` if no block on this fork has been sealed yet.
    pub fn seal(&self) -> Result<Option<Seal>, ProtocolError> {
        let txn = self.store.begin()?;
        match self.store.lookup_fork_latest_seal(&txn, self.block_id)? {
            Some(seal_id) => Ok(self.store.retrieve_seal(&txn, seal_id)?),
            None => Ok(None),
        }
    }

    /// The sealed state commitment as of this block, or the zero
    /// commitment if nothing has been sealed yet on this fork.
    pub fn commit(&self) -> Result<StateCommitment, ProtocolError> {
        Ok(self.seal()?.map(|s| s.final_state).unwrap_or(StateCommitment([0u8; 32])))
    }

    /// The block that sealed `self.block_id` itself, if any descendant has
    /// included that seal.
    pub fn seal_of_self(&self) -> Result<Option<Seal>, ProtocolError> {
        let txn = self.store.begin()?;
        seal_of_block(self.store, &txn, self.block_id)
    }

    pub fn identities(&self, role: Option<Role>) -> Result<IdentityList, ProtocolError> {
        let epoch = self.epochs()?.current()?;
        Ok(match role {
            Some(role) => epoch.initial_identities.filter_role(role),
            None => epoch.initial_identities,
        })
    }

    pub fn identity(&self, node_id: Identifier) -> Result<Option<Identity>, ProtocolError> {
        Ok(self.identities(None)?.get(node_id).cloned())
    }

    pub fn epochs(&self) -> Result<EpochQueries<'a, S>, ProtocolError> {
        let txn = self.store.begin()?;
        let counter =
            self.store.lookup_epoch_counter(&txn, self.block_id)?.ok_or(ProtocolError::NotFound)?;
        let phase = self.store.lookup_phase(&txn, self.block_id)?.ok_or(ProtocolError::NotFound)?;
        Ok(EpochQueries { store: self.store, block_id: self.block_id, counter, phase })
    }
}

fn build_epoch(counter: u64, setup: ServiceEvent, commit: Option<ServiceEvent>) -> Result<Epoch, ProtocolError> {
    let ServiceEvent::EpochSetup { final_view, participants, assignments, random_source, .. } = setup
    else {
        return Err(ProtocolError::NotFound);
    };
    let dkg = match commit {
        Some(ServiceEvent::EpochCommit { cluster_qcs, dkg_group_key, dkg_participants, .. }) => {
            Some(Dkg { group_key: dkg_group_key, cluster_qcs, participants: dkg_participants })
        }
        Some(ServiceEvent::EpochSetup { .. }) => return Err(ProtocolError::NotFound),
        None => None,
    };
    Ok(Epoch {
        counter,
        first_view: 0,
        final_view,
        initial_identities: participants,
        clustering: assignments,
        dkg,
        random_source,
    })
}

/// Bundles the three epoch views reachable from a reference block.
pub struct EpochQueries<'a, S: StateStore> {
    store: &'a S,
    block_id: Identifier,
    counter: u64,
    phase: Phase,
}

impl<'a, S: StateStore> EpochQueries<'a, S> {
    /// Resolved through this block's own `CurrentEpochSetupID`/
    /// `CurrentEpochCommitID` indices rather than a global by-counter
    /// table: two competing, not-yet-finalized forks can each cross the
    /// same epoch boundary with a distinct setup/commit for what is,
    /// numerically, the same next counter, and each fork must see only
    /// the pair it itself observed.
    pub fn current(&self) -> Result<Epoch, ProtocolError> {
        let txn = self.store.begin()?;
        let setup_id = self
            .store
            .lookup_current_epoch_setup(&txn, self.block_id)?
            .ok_or(ProtocolError::NotFound)?;
        let commit_id = self
            .store
            .lookup_current_epoch_commit(&txn, self.block_id)?
            .ok_or(ProtocolError::NotFound)?;
        let setup = self.store.retrieve_service_event(&txn, setup_id)?.ok_or(ProtocolError::NotFound)?;
        let commit = self.store.retrieve_service_event(&txn, commit_id)?.ok_or(ProtocolError::NotFound)?;
        build_epoch(self.counter, setup, Some(commit))
    }

    /// Fails with `EpochNotReady` below `Committed` phase. Resolved through
    /// this block's own `NextEpochSetupID`/`NextEpochCommitID` indices
    /// (§4.H) rather than the global by-counter tables: two forks may have
    /// sealed different, not-yet-finalized setups for the same next
    /// counter, and each fork must see only its own.
    pub fn next(&self) -> Result<Epoch, ProtocolError> {
        if self.phase != Phase::Committed {
            return Err(ProtocolError::EpochNotReady);
        }
        let txn = self.store.begin()?;
        let setup_id = self
            .store
            .lookup_next_epoch_setup(&txn, self.block_id)?
            .ok_or(ProtocolError::NotFound)?;
        let commit_id = self
            .store
            .lookup_next_epoch_commit(&txn, self.block_id)?
            .ok_or(ProtocolError::NotFound)?;
        let setup = self.store.retrieve_service_event(&txn, setup_id)?.ok_or(ProtocolError::NotFound)?;
        let commit = self.store.retrieve_service_event(&txn, commit_id)?.ok_or(ProtocolError::NotFound)?;
        build_epoch(self.counter + 1, setup, Some(commit))
    }

    /// Resolved through this block's own `PreviousEpochSetupID`/
    /// `PreviousEpochCommitID` indices, for the same fork-isolation
    /// reason as `current`.
    pub fn previous(&self) -> Result<Epoch, ProtocolError> {
        if self.counter == 0 {
            return Err(ProtocolError::NotFound);
        }
        let txn = self.store.begin()?;
        let setup_id = self
            .store
            .lookup_previous_epoch_setup(&txn, self.block_id)?
            .ok_or(ProtocolError::NotFound)?;
        let commit_id = self
            .store
            .lookup_previous_epoch_commit(&txn, self.block_id)?
            .ok_or(ProtocolError::NotFound)?;
        let setup = self.store.retrieve_service_event(&txn, setup_id)?.ok_or(ProtocolError::NotFound)?;
        let commit = self.store.retrieve_service_event(&txn, commit_id)?.ok_or(ProtocolError::NotFound)?;
        build_epoch(self.counter - 1, setup, Some(commit))
    }
}
