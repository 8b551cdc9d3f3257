//! Mock chain backends shared by the unit and flow tests.

use crate::chain::{
    BlockSource, BuilderRegistry, ChainError, CommitmentSource, LogSource, LogStream,
    TransactionBackend,
};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256, Bytes, keccak256};
use alloy::rpc::types::{Log, TransactionRequest};
use alloy::sol_types::SolEvent;
use alloy::transports::TransportErrorKind;
use async_trait::async_trait;
use futures_util::StreamExt;
use preconf_sdk::objects::Commitment;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Build an RPC log carrying `event`, emitted by `address` in `block_number`.
pub fn encode_log<E: SolEvent>(address: Address, event: &E, block_number: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block_number),
        ..Default::default()
    }
}

/// Deterministic transaction hash for tests.
pub fn tx_hash(n: u64) -> B256 {
    keccak256(n.to_be_bytes())
}

fn rpc_error(message: &str) -> ChainError {
    ChainError::Rpc(TransportErrorKind::custom_str(message))
}

/// Log source fed through a channel. Can be streamed once.
pub struct ChannelLogSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Log>>>,
    requested: Mutex<Option<(Vec<Address>, Option<u64>)>>,
}

impl ChannelLogSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Log>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            rx: Mutex::new(Some(rx)),
            requested: Mutex::new(None),
        };
        (source, tx)
    }

    /// Arguments of the last `stream_logs` call.
    pub fn requested(&self) -> Option<(Vec<Address>, Option<u64>)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSource for ChannelLogSource {
    async fn stream_logs(
        &self,
        addresses: Vec<Address>,
        from_block: Option<u64>,
    ) -> Result<LogStream, ChainError> {
        *self.requested.lock().unwrap() = Some((addresses, from_block));
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| rpc_error("log stream already taken"))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// L1 blocks, commitments and builders held in memory.
#[derive(Default)]
pub struct MockChain {
    blocks: Mutex<HashMap<u64, Vec<B256>>>,
    commitments: Mutex<Vec<Commitment>>,
    builders: Mutex<HashMap<String, Address>>,
    /// Commitment indexes whose fetch fails.
    failing: Mutex<Vec<B256>>,
    pub builder_lookups: AtomicU64,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&self, block_number: u64, transactions: Vec<B256>) {
        self.blocks.lock().unwrap().insert(block_number, transactions);
    }

    pub fn add_builder(&self, name: &str, address: Address) {
        self.builders.lock().unwrap().insert(name.to_owned(), address);
    }

    pub fn add_commitment(&self, commitment: Commitment) {
        self.commitments.lock().unwrap().push(commitment);
    }

    pub fn fail_commitment(&self, index: B256) {
        self.failing.lock().unwrap().push(index);
    }

    pub fn heal_commitment(&self, index: B256) {
        self.failing.lock().unwrap().retain(|i| *i != index);
    }
}

/// A commitment by `committer` for `block_number` covering `reference`.
pub fn commitment(index: u8, committer: Address, block_number: u64, reference: &str) -> Commitment {
    Commitment {
        index: B256::repeat_byte(index),
        bidder: Address::repeat_byte(0xbd),
        committer,
        bid: 1_000 + u64::from(index),
        block_number,
        transaction_reference: reference.to_owned(),
        bid_hash: keccak256([index]),
        bid_signature: Bytes::new(),
        commitment_signature: Bytes::new(),
        decay_start_timestamp: 1_000,
        decay_end_timestamp: 2_000,
        dispatch_timestamp: 1_250,
    }
}

#[async_trait]
impl BlockSource for MockChain {
    async fn block_transactions(&self, block_number: u64) -> Result<Option<Vec<B256>>, ChainError> {
        Ok(self.blocks.lock().unwrap().get(&block_number).cloned())
    }
}

#[async_trait]
impl CommitmentSource for MockChain {
    async fn commitments_by_block_number(&self, block_number: u64) -> Result<Vec<B256>, ChainError> {
        Ok(self
            .commitments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.block_number == block_number)
            .map(|c| c.index)
            .collect())
    }

    async fn commitment(&self, index: B256) -> Result<Commitment, ChainError> {
        if self.failing.lock().unwrap().contains(&index) {
            return Err(rpc_error("commitment fetch failed"));
        }
        self.commitments
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.index == index)
            .cloned()
            .ok_or_else(|| rpc_error("unknown commitment"))
    }
}

#[async_trait]
impl BuilderRegistry for MockChain {
    async fn builder_address(&self, builder: &str) -> Result<Address, ChainError> {
        self.builder_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .builders
            .lock()
            .unwrap()
            .get(builder)
            .copied()
            .unwrap_or(Address::ZERO))
    }
}

/// Settlement-chain account recording every transaction it is asked to send.
pub struct MockBackend {
    address: Address,
    pending_nonce: AtomicU64,
    finalized_nonce: AtomicU64,
    block_number: AtomicU64,
    fail_next_send: AtomicBool,
    sent: Mutex<Vec<TransactionRequest>>,
    sent_notify: Notify,
}

impl MockBackend {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            pending_nonce: AtomicU64::new(0),
            finalized_nonce: AtomicU64::new(0),
            block_number: AtomicU64::new(1),
            fail_next_send: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
        }
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.pending_nonce.store(nonce, Ordering::SeqCst);
    }

    /// Finalize everything below `nonce` and advance the head.
    pub fn finalize(&self, nonce: u64) {
        self.finalized_nonce.store(nonce, Ordering::SeqCst);
        self.block_number.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_nonces(&self) -> Vec<u64> {
        self.sent().iter().filter_map(|tx| TransactionBuilder::nonce(tx)).collect()
    }

    /// Wait until at least `count` transactions were sent.
    pub async fn wait_for_sent(&self, count: usize) {
        loop {
            let notified = self.sent_notify.notified();
            if self.sent.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TransactionBackend for MockBackend {
    fn address(&self) -> Address {
        self.address
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.pending_nonce.load(Ordering::SeqCst))
    }

    async fn finalized_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.finalized_nonce.load(Ordering::SeqCst))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.block_number.load(Ordering::SeqCst))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ChainError> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(rpc_error("send failed"));
        }
        let nonce = TransactionBuilder::nonce(&tx).unwrap_or_default();
        self.sent.lock().unwrap().push(tx);
        self.sent_notify.notify_waiters();
        Ok(tx_hash(nonce))
    }
}
