//! Transactor configuration.

use std::time::Duration;

/// Default bound on sent-but-unconfirmed settlement transactions.
pub const DEFAULT_ALLOWED_PENDING_TXN_COUNT: u64 = 128;

/// Default period of the confirmation check.
pub const DEFAULT_CONFIRMATION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactorConfig {
    /// How far a nonce may run ahead of the confirmed nonce before `send` waits.
    pub allowed_pending_txn_count: u64,
    /// How often the chain is checked for newly finalized nonces.
    pub confirmation_interval: Duration,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            allowed_pending_txn_count: DEFAULT_ALLOWED_PENDING_TXN_COUNT,
            confirmation_interval: DEFAULT_CONFIRMATION_INTERVAL,
        }
    }
}
