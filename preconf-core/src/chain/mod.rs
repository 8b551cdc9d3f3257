//! Chain access used by the processors.
//!
//! Each concern is a small trait so processors can be driven by an RPC client
//! in production and by mocks in tests:
//!
//! - [`BlockSource`]: transactions of an L1 block
//! - [`CommitmentSource`]: commitments held by the preconf store contract
//! - [`BuilderRegistry`]: builder name to on-chain identity
//! - [`TransactionBackend`]: nonces, head and submission on the settlement chain
//! - [`LogSource`]: contract logs, historic then live

mod rpc;

pub use rpc::{BlockTrackerClient, L1Client, PreconfStoreClient, RpcLogSource, SettlementAccount};

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Log, TransactionRequest};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use preconf_sdk::objects::Commitment;
use thiserror::Error;

/// Errors returned by the chain clients.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC transport error
    #[error("rpc error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),

    /// Contract call error
    #[error("contract call error: {0}")]
    Contract(#[from] alloy::contract::Error),
}

/// Stream of contract logs.
pub type LogStream = BoxStream<'static, Log>;

#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Hashes of the transactions included in `block_number`, or `None` if the
    /// node does not know the block.
    async fn block_transactions(&self, block_number: u64) -> Result<Option<Vec<B256>>, ChainError>;
}

#[async_trait]
pub trait CommitmentSource: Send + Sync {
    /// Indexes of all commitments made for `block_number`.
    async fn commitments_by_block_number(&self, block_number: u64) -> Result<Vec<B256>, ChainError>;

    /// The commitment stored under `index`.
    async fn commitment(&self, index: B256) -> Result<Commitment, ChainError>;
}

#[async_trait]
pub trait BuilderRegistry: Send + Sync {
    /// Identity address registered for a builder. The zero address means the
    /// builder is unknown.
    async fn builder_address(&self, builder: &str) -> Result<Address, ChainError>;
}

/// The settlement-chain account the oracle sends from.
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Address of the sending account.
    fn address(&self) -> Address;

    /// Transaction count including the pending pool.
    async fn pending_nonce(&self) -> Result<u64, ChainError>;

    /// Transaction count at the finalized block.
    async fn finalized_nonce(&self) -> Result<u64, ChainError>;

    /// Current head block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Sign and broadcast `tx`, returning its hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ChainError>;
}

/// A source of contract logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Stream logs emitted by `addresses`.
    ///
    /// With `from_block`, logs from that block onward are replayed first, then
    /// live logs follow. Without it only live logs are streamed.
    async fn stream_logs(
        &self,
        addresses: Vec<Address>,
        from_block: Option<u64>,
    ) -> Result<LogStream, ChainError>;
}
