//! Operator-configurable policy. The only genuine configuration surface
//! this core owns: everything else (wire, storage backend choice, crypto)
//! is a caller concern.

use serde::{Deserialize, Serialize};

/// Resolves an Open Question left by the distillation (§9): whether a root
/// seal that already carries both `EpochSetup` and `EpochCommit` should
/// bootstrap straight into `Committed` phase, or always start at
/// `Staking` regardless of what the root seal contains.
///
/// Decision recorded in DESIGN.md: default to `Staking`, matching §4.H's
/// literal wording ("phase Staking (or Committed if both are already
/// observed in the root seal -- implementation choice, stated in
/// config)"); an operator who wants the other behavior opts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPolicy {
    /// When `true`, a root seal carrying both service events bootstraps
    /// directly into `Committed` phase instead of `Staking`.
    #[serde(default)]
    pub commit_phase_on_complete_root_seal: bool,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self { commit_phase_on_complete_root_seal: false }
    }
}
