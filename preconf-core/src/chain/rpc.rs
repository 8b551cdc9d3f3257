//! Chain clients backed by an alloy [`DynProvider`].

use super::{
    BlockSource, BuilderRegistry, ChainError, CommitmentSource, LogSource, LogStream,
    TransactionBackend,
};
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, future, stream};
use preconf_sdk::contracts::IBlockTracker::IBlockTrackerInstance;
use preconf_sdk::contracts::IPreconfStore::IPreconfStoreInstance;
use preconf_sdk::contracts::{IBlockTracker, IPreconfStore};
use preconf_sdk::objects::Commitment;
use tracing::{debug, info};

/// Read access to the L1 chain.
#[derive(Debug, Clone)]
pub struct L1Client {
    provider: DynProvider,
}

impl L1Client {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl BlockSource for L1Client {
    async fn block_transactions(&self, block_number: u64) -> Result<Option<Vec<B256>>, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await?;
        Ok(block.map(|block| block.transactions.hashes().collect()))
    }
}

/// Commitments read from the preconf store contract.
#[derive(Debug, Clone)]
pub struct PreconfStoreClient {
    contract: IPreconfStoreInstance<DynProvider>,
}

impl PreconfStoreClient {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IPreconfStore::new(address, provider),
        }
    }
}

#[async_trait]
impl CommitmentSource for PreconfStoreClient {
    async fn commitments_by_block_number(&self, block_number: u64) -> Result<Vec<B256>, ChainError> {
        let indexes = self
            .contract
            .getCommitmentsByBlockNumber(U256::from(block_number))
            .call()
            .await?;
        Ok(indexes)
    }

    async fn commitment(&self, index: B256) -> Result<Commitment, ChainError> {
        let raw = self.contract.getCommitment(index).call().await?;
        Ok(Commitment::from_contract(index, raw))
    }
}

/// Builder identities read from the block tracker contract.
#[derive(Debug, Clone)]
pub struct BlockTrackerClient {
    contract: IBlockTrackerInstance<DynProvider>,
}

impl BlockTrackerClient {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IBlockTracker::new(address, provider),
        }
    }
}

#[async_trait]
impl BuilderRegistry for BlockTrackerClient {
    async fn builder_address(&self, builder: &str) -> Result<Address, ChainError> {
        let address = self.contract.getBuilder(builder.to_owned()).call().await?;
        Ok(address)
    }
}

/// The oracle's account on the settlement chain.
///
/// The provider must carry a wallet for `address`, so that
/// [`TransactionBackend::send_transaction`] can sign.
#[derive(Debug, Clone)]
pub struct SettlementAccount {
    provider: DynProvider,
    address: Address,
}

impl SettlementAccount {
    pub fn new(provider: DynProvider, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl TransactionBackend for SettlementAccount {
    fn address(&self) -> Address {
        self.address
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_transaction_count(self.address).pending().await?)
    }

    async fn finalized_nonce(&self) -> Result<u64, ChainError> {
        Ok(self
            .provider
            .get_transaction_count(self.address)
            .block_id(BlockId::finalized())
            .await?)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ChainError> {
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }
}

/// Log source over a pubsub-capable provider.
#[derive(Debug, Clone)]
pub struct RpcLogSource {
    provider: DynProvider,
}

impl RpcLogSource {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn stream_logs(
        &self,
        addresses: Vec<Address>,
        from_block: Option<u64>,
    ) -> Result<LogStream, ChainError> {
        let filter = Filter::new().address(addresses);

        // Subscribe before reading the backlog so nothing emitted in between is lost.
        let live = self.provider.subscribe_logs(&filter).await?.into_stream();

        let Some(from_block) = from_block else {
            return Ok(live.boxed());
        };

        let backlog = self
            .provider
            .get_logs(&filter.from_block(BlockNumberOrTag::Number(from_block)))
            .await?;
        info!(from_block, replayed = backlog.len(), "Replaying historic logs");
        Ok(replay_then_live(backlog, live))
    }
}

/// Whether a live log belongs to a block after the replayed backlog.
fn is_fresh(log: &Log, replayed_up_to: Option<u64>) -> bool {
    match (log.block_number, replayed_up_to) {
        (Some(block), Some(last)) => block > last,
        _ => true,
    }
}

/// Yield `backlog`, then the live logs of blocks it does not cover.
fn replay_then_live<S>(backlog: Vec<Log>, live: S) -> LogStream
where
    S: Stream<Item = Log> + Send + 'static,
{
    let replayed_up_to = backlog.iter().filter_map(|log| log.block_number).max();
    debug!(?replayed_up_to, "Live logs resume after the backlog");
    let live = live.filter(move |log| {
        let fresh = is_fresh(log, replayed_up_to);
        if !fresh {
            debug!(block_number = ?log.block_number, "Skipping replayed live log");
        }
        future::ready(fresh)
    });
    stream::iter(backlog).chain(live).boxed()
}
