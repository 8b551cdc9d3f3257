//! Durable storage for winners, settlements and sent transactions.
//!
//! The store is the single source of truth across restarts. Processors only
//! talk to it through [`OracleStore`]; [`PgStore`] backs production and
//! [`InMemoryStore`] backs tests.

mod memory;
mod pg;
mod subscription;

pub use memory::InMemoryStore;
pub use pg::PgStore;

use alloy::primitives::B256;
use async_trait::async_trait;
use preconf_sdk::objects::{Settlement, Winner};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Type alias for `Result<T, StorageError>`
pub type Result<T> = core::result::Result<T, StorageError>;

/// Stream of winners that still need their commitments evaluated.
pub type WinnerReceiver = mpsc::Receiver<Winner>;
/// Stream of settlements of one window that still need to be posted.
pub type SettlementReceiver = mpsc::Receiver<Settlement>;

/// Errors returned by an [`OracleStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value does not fit the column it is stored in.
    #[error("value {value} out of range for column {column}")]
    OutOfRange { column: &'static str, value: u64 },

    /// A stored value cannot be decoded.
    #[error("corrupt value in column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },
}

/// Storage API used by the settlement processors.
#[async_trait]
pub trait OracleStore: Send + Sync {
    /// Record the winner of an L1 block. Re-announcements are ignored.
    async fn register_winner(&self, winner: &Winner) -> Result<()>;

    /// Subscribe to winners not yet marked complete, oldest block first.
    ///
    /// The store re-queries every time a winner is registered. A winner is
    /// delivered at most once per subscription; subscribing again re-delivers
    /// every winner that is still unprocessed. The stream ends on shutdown or
    /// when the receiver is dropped.
    fn subscribe_winners(&self, shutdown_rx: watch::Receiver<bool>) -> WinnerReceiver;

    /// Mark the winner of `block_number` as fully evaluated.
    async fn update_complete(&self, block_number: i64) -> Result<()>;

    /// Add a decided settlement. Returns `false` if one already exists for the
    /// commitment index.
    async fn add_settlement(&self, settlement: &Settlement) -> Result<bool>;

    /// Subscribe to settlements of `window` that have not been initiated yet.
    ///
    /// The store re-queries every time a settlement is added. A commitment is
    /// delivered at most once per subscription. The stream ends on shutdown or
    /// when the receiver is dropped.
    fn subscribe_settlements(
        &self,
        window: i64,
        shutdown_rx: watch::Receiver<bool>,
    ) -> SettlementReceiver;

    /// Record the settlement-chain transaction posting a settlement.
    async fn settlement_initiated(
        &self,
        commitment_index: B256,
        chain_hash: B256,
        nonce: u64,
    ) -> Result<()>;

    /// Mark every initiated settlement with a nonce below `confirmed_nonce` as
    /// settled. Returns how many were marked.
    async fn mark_settlement_complete(&self, confirmed_nonce: u64) -> Result<u64>;

    /// The highest nonce ever broadcast.
    async fn last_nonce(&self) -> Result<Option<u64>>;

    /// Number of settlement transactions sent but not yet final.
    async fn pending_txn_count(&self) -> Result<u64>;

    /// Record the hash broadcast for `nonce`, replacing any earlier attempt.
    async fn record_transaction(&self, nonce: u64, hash: B256) -> Result<()>;
}

/// Persistent "last processed block" cursor of the event dispatcher.
#[async_trait]
pub trait BlockCursor: Send + Sync {
    /// The last block whose logs were fully dispatched.
    async fn last_block(&self) -> Result<Option<u64>>;

    /// Advance the cursor. Implementations never move it backwards.
    async fn set_last_block(&self, block_number: u64) -> Result<()>;
}

fn to_i64(column: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StorageError::OutOfRange { column, value })
}

fn to_u64(column: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt {
        column,
        reason: format!("negative value {value}"),
    })
}

fn from_decimal(column: &'static str, value: Decimal) -> Result<u64> {
    if !value.fract().is_zero() {
        return Err(StorageError::Corrupt {
            column,
            reason: format!("fractional value {value}"),
        });
    }
    value.to_u64().ok_or_else(|| StorageError::Corrupt {
        column,
        reason: format!("value {value} does not fit in u64"),
    })
}

fn to_b256(column: &'static str, bytes: &[u8]) -> Result<B256> {
    B256::try_from(bytes).map_err(|_| StorageError::Corrupt {
        column,
        reason: format!("expected 32 bytes, got {}", bytes.len()),
    })
}
