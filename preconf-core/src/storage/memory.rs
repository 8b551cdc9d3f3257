//! Oracle storage implementation in-memory. For testing only.

use super::subscription::spawn_subscription;
use super::{BlockCursor, OracleStore, Result, SettlementReceiver, StorageError, WinnerReceiver};
use alloy::primitives::B256;
use async_trait::async_trait;
use preconf_sdk::objects::{Settlement, Winner};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// A settlement together with its initiation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSettlement {
    pub settlement: Settlement,
    pub chain_hash: Option<B256>,
    pub nonce: Option<u64>,
    pub settled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    /// Winners by block number, with their processed flag.
    winners: BTreeMap<i64, (Winner, bool)>,
    /// Settlements in insertion order.
    settlements: Vec<StoredSettlement>,
    sent_transactions: BTreeMap<u64, B256>,
    last_block: Option<u64>,
    fail_next_record: bool,
}

/// [`OracleStore`] implementation in-memory. Used for testing
#[derive(Debug)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    winner_trigger: watch::Sender<u64>,
    settlement_trigger: watch::Sender<u64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            winner_trigger: watch::Sender::new(0),
            settlement_trigger: watch::Sender::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// All settlements, in insertion order.
    pub fn settlements(&self) -> Vec<StoredSettlement> {
        self.lock().settlements.clone()
    }

    /// Whether the winner of `block_number` has been marked complete.
    pub fn is_winner_processed(&self, block_number: i64) -> Option<bool> {
        self.lock().winners.get(&block_number).map(|(_, processed)| *processed)
    }

    /// Hashes recorded per nonce.
    pub fn sent_transactions(&self) -> BTreeMap<u64, B256> {
        self.lock().sent_transactions.clone()
    }

    /// Make the next [`OracleStore::record_transaction`] call fail.
    pub fn fail_next_record(&self) {
        self.lock().fail_next_record = true;
    }
}

// A poisoned lock only means a test thread panicked mid-update; the data is
// still the best view we have.
fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl OracleStore for InMemoryStore {
    async fn register_winner(&self, winner: &Winner) -> Result<()> {
        self.lock()
            .winners
            .entry(winner.block_number)
            .or_insert_with(|| (winner.clone(), false));
        self.winner_trigger.send_modify(|v| *v += 1);
        Ok(())
    }

    fn subscribe_winners(&self, shutdown_rx: watch::Receiver<bool>) -> WinnerReceiver {
        let inner = self.inner.clone();
        spawn_subscription(
            "winners",
            self.winner_trigger.subscribe(),
            shutdown_rx,
            |w: &Winner| w.block_number,
            move || {
                let pending: Vec<Winner> = lock(&inner)
                    .winners
                    .values()
                    .filter(|(_, processed)| !processed)
                    .map(|(w, _)| w.clone())
                    .collect();
                async move { Ok(pending) }
            },
        )
    }

    async fn update_complete(&self, block_number: i64) -> Result<()> {
        if let Some((_, processed)) = self.lock().winners.get_mut(&block_number) {
            *processed = true;
        }
        Ok(())
    }

    async fn add_settlement(&self, settlement: &Settlement) -> Result<bool> {
        let inserted = {
            let mut inner = self.lock();
            let exists = inner
                .settlements
                .iter()
                .any(|s| s.settlement.commitment_index == settlement.commitment_index);
            if !exists {
                inner.settlements.push(StoredSettlement {
                    settlement: settlement.clone(),
                    chain_hash: None,
                    nonce: None,
                    settled: false,
                });
            }
            !exists
        };
        if inserted {
            self.settlement_trigger.send_modify(|v| *v += 1);
        }
        Ok(inserted)
    }

    fn subscribe_settlements(
        &self,
        window: i64,
        shutdown_rx: watch::Receiver<bool>,
    ) -> SettlementReceiver {
        let inner = self.inner.clone();
        spawn_subscription(
            "settlements",
            self.settlement_trigger.subscribe(),
            shutdown_rx,
            |s: &Settlement| s.commitment_index,
            move || {
                let mut pending: Vec<Settlement> = lock(&inner)
                    .settlements
                    .iter()
                    .filter(|s| s.settlement.window == window && s.chain_hash.is_none() && !s.settled)
                    .map(|s| s.settlement.clone())
                    .collect();
                // Stable sort keeps insertion order within a block.
                pending.sort_by_key(|s| s.block_number);
                async move { Ok(pending) }
            },
        )
    }

    async fn settlement_initiated(
        &self,
        commitment_index: B256,
        chain_hash: B256,
        nonce: u64,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(s) = inner
            .settlements
            .iter_mut()
            .find(|s| s.settlement.commitment_index == commitment_index)
        {
            s.chain_hash = Some(chain_hash);
            s.nonce = Some(nonce);
        }
        Ok(())
    }

    async fn mark_settlement_complete(&self, confirmed_nonce: u64) -> Result<u64> {
        let mut inner = self.lock();
        let mut marked = 0;
        for s in inner.settlements.iter_mut() {
            if !s.settled && s.nonce.is_some_and(|n| n < confirmed_nonce) {
                s.settled = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn last_nonce(&self) -> Result<Option<u64>> {
        Ok(self.lock().sent_transactions.keys().next_back().copied())
    }

    async fn pending_txn_count(&self) -> Result<u64> {
        let count = self
            .lock()
            .settlements
            .iter()
            .filter(|s| s.chain_hash.is_some() && !s.settled)
            .count();
        Ok(count as u64)
    }

    async fn record_transaction(&self, nonce: u64, hash: B256) -> Result<()> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_record) {
            return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
        }
        inner.sent_transactions.insert(nonce, hash);
        Ok(())
    }
}

#[async_trait]
impl BlockCursor for InMemoryStore {
    async fn last_block(&self) -> Result<Option<u64>> {
        Ok(self.lock().last_block)
    }

    async fn set_last_block(&self, block_number: u64) -> Result<()> {
        let mut inner = self.lock();
        inner.last_block = Some(inner.last_block.map_or(block_number, |b| b.max(block_number)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preconf_sdk::objects::SettlementType;
    use std::time::Duration;

    fn settlement(index: u8, window: i64) -> Settlement {
        Settlement {
            commitment_index: B256::repeat_byte(index),
            transaction: "0x01".to_owned(),
            block_number: 10,
            builder: "builder".to_owned(),
            amount: 5,
            bid_id: B256::ZERO,
            settlement_type: SettlementType::Reward,
            decay_percentage: 100,
            window,
        }
    }

    #[tokio::test]
    async fn duplicate_settlements_are_ignored() {
        let store = InMemoryStore::new();
        assert!(store.add_settlement(&settlement(1, 3)).await.unwrap());
        assert!(!store.add_settlement(&settlement(1, 3)).await.unwrap());
        assert_eq!(store.settlements().len(), 1);
    }

    #[tokio::test]
    async fn settlement_lifecycle() {
        let store = InMemoryStore::new();
        store.add_settlement(&settlement(1, 3)).await.unwrap();
        store.add_settlement(&settlement(2, 3)).await.unwrap();

        store
            .settlement_initiated(B256::repeat_byte(1), B256::repeat_byte(0xaa), 7)
            .await
            .unwrap();
        store
            .settlement_initiated(B256::repeat_byte(2), B256::repeat_byte(0xbb), 8)
            .await
            .unwrap();
        assert_eq!(store.pending_txn_count().await.unwrap(), 2);

        // Nonce 7 is final once the confirmed nonce passes it.
        assert_eq!(store.mark_settlement_complete(8).await.unwrap(), 1);
        assert_eq!(store.pending_txn_count().await.unwrap(), 1);
        assert_eq!(store.mark_settlement_complete(8).await.unwrap(), 0);
        assert_eq!(store.mark_settlement_complete(9).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn settlement_subscription_is_scoped_to_window() {
        let store = InMemoryStore::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        store.add_settlement(&settlement(1, 3)).await.unwrap();
        store.add_settlement(&settlement(2, 4)).await.unwrap();

        let mut rx = store.subscribe_settlements(3, shutdown_rx);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.commitment_index, B256::repeat_byte(1));

        store.add_settlement(&settlement(3, 3)).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.commitment_index, B256::repeat_byte(3));

        let none = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(none.is_err());
    }

    #[tokio::test]
    async fn resubscribing_redelivers_unprocessed_winners() {
        let store = InMemoryStore::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        for block in [12, 11] {
            store
                .register_winner(&Winner { block_number: block, builder: "b".into(), window: 1 })
                .await
                .unwrap();
        }

        let mut rx = store.subscribe_winners(shutdown_rx.clone());
        assert_eq!(rx.recv().await.unwrap().block_number, 11);
        assert_eq!(rx.recv().await.unwrap().block_number, 12);
        store.update_complete(12).await.unwrap();
        drop(rx);

        let mut rx = store.subscribe_winners(shutdown_rx);
        assert_eq!(rx.recv().await.unwrap().block_number, 11);
        assert_eq!(store.is_winner_processed(12), Some(true));
    }

    #[tokio::test]
    async fn last_nonce_tracks_highest_recorded() {
        let store = InMemoryStore::new();
        assert_eq!(store.last_nonce().await.unwrap(), None);
        store.record_transaction(4, B256::ZERO).await.unwrap();
        store.record_transaction(2, B256::ZERO).await.unwrap();
        assert_eq!(store.last_nonce().await.unwrap(), Some(4));
    }
}
