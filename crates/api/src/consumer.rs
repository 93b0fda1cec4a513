//! The synchronous consumer interface (§4.G, §9): events are delivered in
//! canonical height order on the finalize caller's thread. A consumer that
//! needs asynchronous dispatch owns its own queue; the core does not
//! spawn coroutines or background tasks on a consumer's behalf.

use protocol_types::Header;

/// Observed from the core during `finalize`/`mark_valid`.
///
/// Implementations must not block indefinitely: the whole `finalize` call
/// fails and its transaction aborts if a consumer returns an error.
pub trait ProtocolConsumer: Send + Sync {
    fn block_finalized(&self, _header: &Header) -> Result<(), String> {
        Ok(())
    }
    fn block_processable(&self, _header: &Header) -> Result<(), String> {
        Ok(())
    }
    fn epoch_transition(&self, _new_counter: u64, _first_block: &Header) -> Result<(), String> {
        Ok(())
    }
    fn epoch_setup_phase_started(&self, _current_counter: u64, _block: &Header) -> Result<(), String> {
        Ok(())
    }
    fn epoch_committed_phase_started(
        &self,
        _current_counter: u64,
        _block: &Header,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// A consumer that does nothing; useful as a default and in tests that
/// don't assert on event delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl ProtocolConsumer for NullConsumer {}
