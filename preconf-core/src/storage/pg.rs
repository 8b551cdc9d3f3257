//! Oracle storage implementation using a PostgreSQL database.

use super::subscription::spawn_subscription;
use super::{
    BlockCursor, OracleStore, Result, SettlementReceiver, WinnerReceiver, from_decimal, to_b256,
    to_i64, to_u64,
};
use crate::entities::listener_state::{GetLastProcessedBlock, SetLastProcessedBlock};
use crate::entities::sent_transaction::{GetLastNonce, UpsertSentTransaction};
use crate::entities::settlement::{
    CountPendingSettlementTxns, GetPendingSettlements, InsertSettlement, MarkSettlementInitiated,
    MarkSettlementsComplete, SettlementInsert, SettlementRecord,
};
use crate::entities::winner::{GetUnprocessedWinners, InsertWinner, MarkWinnerProcessed, WinnerRecord};
use crate::framework::DatabaseProcessor;
use alloy::primitives::B256;
use async_trait::async_trait;
use kanau::processor::Processor;
use preconf_sdk::objects::{Settlement, Winner};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::debug;

/// PostgreSQL storage implementation.
///
/// Subscriptions are driven by in-process triggers: writes made through this
/// instance wake the subscriptions, which then re-query the database.
#[derive(Debug)]
pub struct PgStore {
    db: DatabaseProcessor,
    winner_trigger: watch::Sender<u64>,
    settlement_trigger: watch::Sender<u64>,
}

impl PgStore {
    /// Creates a new PostgreSQL storage instance.
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
            winner_trigger: watch::Sender::new(0),
            settlement_trigger: watch::Sender::new(0),
        }
    }
}

impl From<WinnerRecord> for Winner {
    fn from(record: WinnerRecord) -> Self {
        Winner {
            block_number: record.block_number,
            builder: record.builder_name,
            window: record.settlement_window,
        }
    }
}

impl TryFrom<SettlementRecord> for Settlement {
    type Error = super::StorageError;

    fn try_from(record: SettlementRecord) -> Result<Self> {
        Ok(Settlement {
            commitment_index: to_b256("commitment_index", &record.commitment_index)?,
            transaction: record.transaction,
            block_number: record.block_number,
            builder: record.builder_name,
            amount: from_decimal("amount", record.amount)?,
            bid_id: to_b256("bid_id", &record.bid_id)?,
            settlement_type: record.settlement_type.into(),
            decay_percentage: record.decay_percentage,
            window: record.settlement_window,
        })
    }
}

#[async_trait]
impl OracleStore for PgStore {
    async fn register_winner(&self, winner: &Winner) -> Result<()> {
        let inserted = self
            .db
            .process(InsertWinner {
                block_number: winner.block_number,
                builder_name: winner.builder.clone(),
                settlement_window: winner.window,
            })
            .await?;
        if !inserted {
            debug!(block_number = winner.block_number, "Winner already registered");
        }
        self.winner_trigger.send_modify(|v| *v += 1);
        Ok(())
    }

    fn subscribe_winners(&self, shutdown_rx: watch::Receiver<bool>) -> WinnerReceiver {
        let db = self.db.clone();
        spawn_subscription(
            "winners",
            self.winner_trigger.subscribe(),
            shutdown_rx,
            |w: &Winner| w.block_number,
            move || {
                let db = db.clone();
                async move {
                    let records = db.process(GetUnprocessedWinners).await?;
                    Ok(records.into_iter().map(Winner::from).collect())
                }
            },
        )
    }

    async fn update_complete(&self, block_number: i64) -> Result<()> {
        self.db.process(MarkWinnerProcessed { block_number }).await?;
        Ok(())
    }

    async fn add_settlement(&self, settlement: &Settlement) -> Result<bool> {
        let insert = SettlementInsert {
            commitment_index: settlement.commitment_index.to_vec(),
            transaction: settlement.transaction.clone(),
            block_number: settlement.block_number,
            builder_name: settlement.builder.clone(),
            amount: Decimal::from(settlement.amount),
            bid_id: settlement.bid_id.to_vec(),
            settlement_type: settlement.settlement_type.into(),
            decay_percentage: settlement.decay_percentage,
            settlement_window: settlement.window,
        };
        let inserted = self.db.process(InsertSettlement { settlement: insert }).await?;
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
        let db = self.db.clone();
        spawn_subscription(
            "settlements",
            self.settlement_trigger.subscribe(),
            shutdown_rx,
            |s: &Settlement| s.commitment_index,
            move || {
                let db = db.clone();
                async move {
                    let records = db
                        .process(GetPendingSettlements {
                            settlement_window: window,
                        })
                        .await?;
                    records.into_iter().map(Settlement::try_from).collect()
                }
            },
        )
    }

    async fn settlement_initiated(
        &self,
        commitment_index: B256,
        chain_hash: B256,
        nonce: u64,
    ) -> Result<()> {
        self.db
            .process(MarkSettlementInitiated {
                commitment_index: commitment_index.to_vec(),
                chain_hash: chain_hash.to_vec(),
                nonce: to_i64("nonce", nonce)?,
            })
            .await?;
        Ok(())
    }

    async fn mark_settlement_complete(&self, confirmed_nonce: u64) -> Result<u64> {
        let marked = self
            .db
            .process(MarkSettlementsComplete {
                confirmed_nonce: to_i64("nonce", confirmed_nonce)?,
            })
            .await?;
        Ok(marked)
    }

    async fn last_nonce(&self) -> Result<Option<u64>> {
        self.db
            .process(GetLastNonce)
            .await?
            .map(|nonce| to_u64("nonce", nonce))
            .transpose()
    }

    async fn pending_txn_count(&self) -> Result<u64> {
        let count = self.db.process(CountPendingSettlementTxns).await?;
        to_u64("count", count)
    }

    async fn record_transaction(&self, nonce: u64, hash: B256) -> Result<()> {
        self.db
            .process(UpsertSentTransaction {
                nonce: to_i64("nonce", nonce)?,
                hash: hash.to_vec(),
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BlockCursor for PgStore {
    async fn last_block(&self) -> Result<Option<u64>> {
        self.db
            .process(GetLastProcessedBlock)
            .await?
            .map(|block| to_u64("last_block", block))
            .transpose()
    }

    async fn set_last_block(&self, block_number: u64) -> Result<()> {
        self.db
            .process(SetLastProcessedBlock {
                block_number: to_i64("last_block", block_number)?,
            })
            .await?;
        Ok(())
    }
}
