//! Configuration types for the settlement oracle.
//!
//! These types represent the validated runtime configuration used by the
//! processors. Loading and parsing is handled by the server crate.

mod contracts;
mod transactor;
mod updater;

pub use contracts::ContractsConfig;
pub use transactor::{DEFAULT_ALLOWED_PENDING_TXN_COUNT, DEFAULT_CONFIRMATION_INTERVAL, TransactorConfig};
pub use updater::UpdaterConfig;

/// Where the event dispatcher starts reading logs on first start.
///
/// Once a block has been dispatched, the stored cursor takes precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerConfig {
    pub start_block: Option<u64>,
}
