//! Transactor processor.
//!
//! The Transactor is responsible for:
//! - Allocating settlement-chain nonces to concurrent callers
//! - Sending transactions strictly in allocation order
//! - Bounding how far sends run ahead of the finalized nonce (backpressure)
//! - Tracking finalization and marking settled records in the store
//!
//! Ordering and confirmation are two independent `watch` channels, so a send
//! waiting on backpressure never blocks allocation.

use crate::chain::{ChainError, TransactionBackend};
use crate::config::TransactorConfig;
use crate::storage::{OracleStore, StorageError};
use crate::utils::shutdown::wait_for_shutdown;
use alloy::network::TransactionBuilder;
use alloy::primitives::B256;
use alloy::rpc::types::TransactionRequest;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur while allocating, sending or confirming.
#[derive(Debug, Error)]
pub enum TransactorError {
    /// Chain RPC error
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The transaction carries no nonce.
    #[error("transaction has no nonce")]
    MissingNonce,

    /// The nonce was not handed out by `allocate_nonce`, or was already sent.
    #[error("nonce {0} is not allocated")]
    NotAllocated(u64),

    /// Shutdown was signaled while waiting.
    #[error("transactor is shutting down")]
    Shutdown,
}

/// Allocated nonces waiting to be sent.
#[derive(Debug, Clone, Default)]
struct NonceQueue {
    next_nonce: u64,
    pending: VecDeque<u64>,
    /// A send of the head nonce is in progress.
    in_flight: bool,
}

/// Releases the claim on the queue head. Unless the send completed, the head
/// stays allocated so the nonce can be sent again.
struct HeadClaim<'a> {
    queue: &'a watch::Sender<NonceQueue>,
    sent: bool,
}

impl HeadClaim<'_> {
    fn complete(mut self) {
        self.sent = true;
    }
}

impl Drop for HeadClaim<'_> {
    fn drop(&mut self) {
        let sent = self.sent;
        self.queue.send_modify(|queue| {
            if sent {
                queue.pending.pop_front();
            }
            queue.in_flight = false;
        });
    }
}

/// Nonce-ordered transaction sender for the oracle account.
pub struct Transactor {
    backend: Arc<dyn TransactionBackend>,
    store: Arc<dyn OracleStore>,
    config: TransactorConfig,
    queue: watch::Sender<NonceQueue>,
    /// Every nonce below this one is final.
    confirmed: watch::Sender<u64>,
    /// Head block seen by the last successful confirmation check, plus one.
    checked_block: AtomicU64,
    shutdown_rx: watch::Receiver<bool>,
}

impl Transactor {
    /// Create a transactor, restoring the next nonce from the store and the
    /// confirmed nonce from the chain.
    pub async fn new(
        backend: Arc<dyn TransactionBackend>,
        store: Arc<dyn OracleStore>,
        config: TransactorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, TransactorError> {
        let last_nonce = store.last_nonce().await?;
        let confirmed = backend.finalized_nonce().await?;
        let next_nonce = last_nonce.map_or(0, |nonce| nonce + 1);
        info!(
            account = %backend.address(),
            next_nonce,
            confirmed_nonce = confirmed,
            allowed_pending = config.allowed_pending_txn_count,
            "Transactor restored"
        );

        Ok(Self {
            backend,
            store,
            config,
            queue: watch::Sender::new(NonceQueue {
                next_nonce,
                ..Default::default()
            }),
            confirmed: watch::Sender::new(confirmed),
            checked_block: AtomicU64::new(0),
            shutdown_rx,
        })
    }

    /// Address transactions are sent from.
    pub fn address(&self) -> alloy::primitives::Address {
        self.backend.address()
    }

    /// Every nonce below the returned one is final.
    pub fn confirmed_nonce(&self) -> u64 {
        *self.confirmed.borrow()
    }

    /// Number of allocated nonces not yet sent.
    pub fn unsent_count(&self) -> usize {
        self.queue.borrow().pending.len()
    }

    /// Allocate the next nonce and queue it for sending.
    ///
    /// Nonces already used on chain, e.g. by another process sharing the
    /// account, are skipped.
    pub async fn allocate_nonce(&self) -> Result<u64, TransactorError> {
        let chain_pending = self.backend.pending_nonce().await?;
        let mut nonce = 0;
        self.queue.send_modify(|queue| {
            queue.next_nonce = queue.next_nonce.max(chain_pending);
            nonce = queue.next_nonce;
            queue.next_nonce += 1;
            queue.pending.push_back(nonce);
        });
        debug!(nonce, chain_pending, "Allocated nonce");
        Ok(nonce)
    }

    /// Send `tx`, whose nonce must come from [`Self::allocate_nonce`].
    ///
    /// Waits until the nonce is within the allowed distance of the confirmed
    /// nonce, then until every lower allocated nonce has been sent. On a
    /// transport error the nonce stays at the head of the queue and the caller
    /// may retry with the same nonce.
    pub async fn send(&self, tx: TransactionRequest) -> Result<B256, TransactorError> {
        let nonce = TransactionBuilder::nonce(&tx).ok_or(TransactorError::MissingNonce)?;
        let mut shutdown_rx = self.shutdown_rx.clone();

        let allowed = self.config.allowed_pending_txn_count;
        let mut confirmed_rx = self.confirmed.subscribe();
        let confirmed_nonce = *confirmed_rx.borrow();
        if nonce.saturating_sub(confirmed_nonce) >= allowed {
            debug!(nonce, confirmed_nonce, "Waiting for confirmations");
        }
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown_rx) => return Err(TransactorError::Shutdown),
            // The sender lives in `self`, so the wait cannot fail.
            _ = confirmed_rx.wait_for(|confirmed| nonce.saturating_sub(*confirmed) < allowed) => {}
        }

        let claim = self.claim_head(nonce, &mut shutdown_rx).await?;

        match self.backend.send_transaction(tx).await {
            Ok(hash) => {
                claim.complete();
                info!(nonce, %hash, "Sent transaction");
                // The broadcast already happened; the chain's pending nonce
                // covers the missing row on restart.
                if let Err(e) = self.store.record_transaction(nonce, hash).await {
                    error!(nonce, %hash, error = %e, "Failed to record sent transaction");
                }
                Ok(hash)
            }
            Err(e) => {
                drop(claim);
                error!(nonce, error = %e, "Failed to send transaction, nonce stays allocated");
                Err(e.into())
            }
        }
    }

    /// Wait until `nonce` is the queue head with no send in progress, then
    /// claim it.
    async fn claim_head(
        &self,
        nonce: u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<HeadClaim<'_>, TransactorError> {
        let mut queue_rx = self.queue.subscribe();
        loop {
            let mut allocated = false;
            let mut claimed = false;
            self.queue.send_if_modified(|queue| {
                allocated = queue.pending.contains(&nonce);
                if queue.pending.front() == Some(&nonce) && !queue.in_flight {
                    queue.in_flight = true;
                    claimed = true;
                }
                false
            });
            if !allocated {
                return Err(TransactorError::NotAllocated(nonce));
            }
            if claimed {
                return Ok(HeadClaim {
                    queue: &self.queue,
                    sent: false,
                });
            }

            trace!(nonce, "Waiting for lower nonces to be sent");
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown_rx) => return Err(TransactorError::Shutdown),
                _ = queue_rx.changed() => {}
            }
        }
    }

    /// Run one confirmation check.
    ///
    /// If the head advanced since the last successful check, raise the
    /// confirmed nonce to the finalized nonce and mark every settlement below
    /// it as settled.
    pub async fn check_confirmations(&self) -> Result<(), TransactorError> {
        let head = self.backend.block_number().await?;
        let checked = self.checked_block.load(Ordering::Acquire);
        if head < checked {
            trace!(head, "Head has not advanced");
            return Ok(());
        }

        let finalized = self.backend.finalized_nonce().await?;
        let raised = self.confirmed.send_if_modified(|confirmed| {
            if finalized > *confirmed {
                *confirmed = finalized;
                true
            } else {
                false
            }
        });
        let confirmed_nonce = self.confirmed_nonce();
        if raised {
            debug!(head, confirmed_nonce, "Confirmed nonce advanced");
        }

        let marked = self.store.mark_settlement_complete(confirmed_nonce).await?;
        if marked > 0 {
            info!(marked, confirmed_nonce, "Settlements confirmed");
        }

        self.checked_block.store(head + 1, Ordering::Release);
        Ok(())
    }

    /// Run the confirmation loop until shutdown is signaled.
    ///
    /// Errors are logged and the check is retried on the next tick.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.confirmation_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                _ = interval.tick() => {
                    if let Err(e) = self.check_confirmations().await {
                        warn!(error = %e, "Confirmation check failed, retrying next tick");
                    }
                }
            }
        }

        info!("Transactor shutdown complete");
    }
}

/// A transaction request for `nonce` from `transactor`'s account.
pub fn request_with_nonce(transactor: &Transactor, nonce: u64) -> TransactionRequest {
    TransactionRequest::default()
        .with_from(transactor.address())
        .with_nonce(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::testing::{MockBackend, tx_hash};
    use alloy::primitives::Address;
    use preconf_sdk::objects::{Settlement, SettlementType};
    use std::time::Duration;

    struct Fixture {
        backend: Arc<MockBackend>,
        store: Arc<InMemoryStore>,
        transactor: Arc<Transactor>,
        shutdown_tx: watch::Sender<bool>,
    }

    async fn fixture(allowed: u64, store: InMemoryStore) -> Fixture {
        let backend = Arc::new(MockBackend::new(Address::repeat_byte(0xaa)));
        let store = Arc::new(store);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = TransactorConfig {
            allowed_pending_txn_count: allowed,
            confirmation_interval: Duration::from_millis(10),
        };
        let transactor = Transactor::new(backend.clone(), store.clone(), config, shutdown_rx)
            .await
            .unwrap();
        Fixture {
            backend,
            store,
            transactor: Arc::new(transactor),
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn concurrent_allocations_are_sent_in_order() {
        let f = fixture(128, InMemoryStore::new()).await;

        let allocations: Vec<_> = (0..20)
            .map(|_| {
                let transactor = f.transactor.clone();
                tokio::spawn(async move { transactor.allocate_nonce().await.unwrap() })
            })
            .collect();
        let mut nonces = Vec::new();
        for handle in allocations {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..20).collect::<Vec<_>>());

        // Highest nonce first: every send has to wait for the ones below it.
        let sends: Vec<_> = nonces
            .iter()
            .rev()
            .map(|&nonce| {
                let transactor = f.transactor.clone();
                tokio::spawn(async move {
                    let tx = request_with_nonce(&transactor, nonce);
                    transactor.send(tx).await.unwrap()
                })
            })
            .collect();
        for handle in sends {
            handle.await.unwrap();
        }

        assert_eq!(f.backend.sent_nonces(), (0..20).collect::<Vec<_>>());
        assert_eq!(f.store.sent_transactions().len(), 20);
        assert_eq!(f.transactor.unsent_count(), 0);
    }

    #[tokio::test]
    async fn send_blocks_until_confirmation_advances() {
        let f = fixture(5, InMemoryStore::new()).await;
        for _ in 0..6 {
            f.transactor.allocate_nonce().await.unwrap();
        }
        for nonce in 0..5 {
            let tx = request_with_nonce(&f.transactor, nonce);
            f.transactor.send(tx).await.unwrap();
        }

        let transactor = f.transactor.clone();
        let mut sixth = tokio::spawn(async move {
            let tx = request_with_nonce(&transactor, 5);
            transactor.send(tx).await
        });
        let blocked = tokio::time::timeout(Duration::from_millis(50), &mut sixth).await;
        assert!(blocked.is_err());
        assert_eq!(f.backend.sent_nonces().len(), 5);

        f.backend.finalize(1);
        f.transactor.check_confirmations().await.unwrap();
        let hash = tokio::time::timeout(Duration::from_secs(1), sixth)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(hash, tx_hash(5));
        assert_eq!(f.transactor.confirmed_nonce(), 1);
    }

    #[tokio::test]
    async fn failed_send_keeps_the_nonce() {
        let f = fixture(128, InMemoryStore::new()).await;
        let first = f.transactor.allocate_nonce().await.unwrap();
        let second = f.transactor.allocate_nonce().await.unwrap();

        f.backend.fail_next_send();
        let failed = f.transactor.send(request_with_nonce(&f.transactor, first)).await;
        assert!(matches!(failed, Err(TransactorError::Chain(_))));
        assert_eq!(f.transactor.unsent_count(), 2);

        // The second nonce still waits behind the first.
        let transactor = f.transactor.clone();
        let mut later = tokio::spawn(async move {
            transactor.send(request_with_nonce(&transactor, second)).await
        });
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut later).await.is_err());

        f.transactor.send(request_with_nonce(&f.transactor, first)).await.unwrap();
        later.await.unwrap().unwrap();
        assert_eq!(f.backend.sent_nonces(), vec![0, 1]);
    }

    #[tokio::test]
    async fn broadcast_succeeds_when_recording_fails() {
        let f = fixture(128, InMemoryStore::new()).await;
        let first = f.transactor.allocate_nonce().await.unwrap();
        let second = f.transactor.allocate_nonce().await.unwrap();

        f.store.fail_next_record();
        let hash = f.transactor.send(request_with_nonce(&f.transactor, first)).await.unwrap();
        assert_eq!(hash, tx_hash(first));
        f.transactor.send(request_with_nonce(&f.transactor, second)).await.unwrap();

        assert_eq!(f.backend.sent_nonces(), vec![0, 1]);
        let recorded = f.store.sent_transactions();
        assert!(!recorded.contains_key(&first));
        assert_eq!(recorded.get(&second), Some(&tx_hash(second)));
        assert_eq!(f.transactor.unsent_count(), 0);

        // A restarted transactor continues after the chain's pending nonce.
        f.backend.set_pending_nonce(2);
        let store = Arc::new(InMemoryStore::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = TransactorConfig {
            allowed_pending_txn_count: 128,
            confirmation_interval: Duration::from_millis(10),
        };
        let restarted = Transactor::new(f.backend.clone(), store, config, shutdown_rx)
            .await
            .unwrap();
        assert_eq!(restarted.allocate_nonce().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_nonces_are_rejected() {
        let f = fixture(128, InMemoryStore::new()).await;
        let result = f.transactor.send(request_with_nonce(&f.transactor, 3)).await;
        assert!(matches!(result, Err(TransactorError::NotAllocated(3))));
        let result = f.transactor.send(TransactionRequest::default()).await;
        assert!(matches!(result, Err(TransactorError::MissingNonce)));
    }

    #[tokio::test]
    async fn next_nonce_is_restored_from_store() {
        let store = InMemoryStore::new();
        store.record_transaction(9, tx_hash(9)).await.unwrap();
        let f = fixture(128, store).await;
        assert_eq!(f.transactor.allocate_nonce().await.unwrap(), 10);

        // The chain wins when it is ahead.
        f.backend.set_pending_nonce(40);
        assert_eq!(f.transactor.allocate_nonce().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn confirmation_marks_settlements() {
        let f = fixture(128, InMemoryStore::new()).await;
        let settlement = Settlement {
            commitment_index: B256::repeat_byte(1),
            transaction: "0x01".into(),
            block_number: 10,
            builder: "builder".into(),
            amount: 3,
            bid_id: B256::ZERO,
            settlement_type: SettlementType::Reward,
            decay_percentage: 100,
            window: 1,
        };
        f.store.add_settlement(&settlement).await.unwrap();
        let nonce = f.transactor.allocate_nonce().await.unwrap();
        let hash = f.transactor.send(request_with_nonce(&f.transactor, nonce)).await.unwrap();
        f.store.settlement_initiated(settlement.commitment_index, hash, nonce).await.unwrap();

        f.transactor.check_confirmations().await.unwrap();
        assert!(!f.store.settlements()[0].settled);

        f.backend.finalize(1);
        f.transactor.check_confirmations().await.unwrap();
        assert!(f.store.settlements()[0].settled);
        assert_eq!(f.store.pending_txn_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_sends() {
        let f = fixture(128, InMemoryStore::new()).await;
        f.transactor.allocate_nonce().await.unwrap();
        let second = f.transactor.allocate_nonce().await.unwrap();

        let transactor = f.transactor.clone();
        let waiting = tokio::spawn(async move {
            transactor.send(request_with_nonce(&transactor, second)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.shutdown_tx.send_replace(true);

        let result = tokio::time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
        assert!(matches!(result, Err(TransactorError::Shutdown)));
    }
}
