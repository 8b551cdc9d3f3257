//! Contract addresses on the settlement chain.

use alloy::primitives::Address;

/// Addresses of the contracts the oracle reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractsConfig {
    /// Emits `NewL1Block` and `NewWindow`, and resolves builder identities.
    pub block_tracker: Address,
    /// Holds the commitments.
    pub preconf_store: Address,
    /// Receives settlement calls.
    pub oracle: Address,
}
