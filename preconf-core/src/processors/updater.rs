//! Updater processor.
//!
//! The Updater is responsible for:
//! - Receiving winners from the store, oldest block first
//! - Comparing every commitment made for the block against its transactions
//! - Writing one settlement per commitment (reward, slash or return)
//! - Marking the winner complete once all its commitments are recorded
//!
//! A failed winner is left unprocessed. The Updater backs off, resubscribes
//! and the store delivers the same winner again; settlement inserts are
//! idempotent so the retry only adds what is missing.

use crate::chain::{BlockSource, BuilderRegistry, ChainError, CommitmentSource};
use crate::config::UpdaterConfig;
use crate::storage::{OracleStore, StorageError};
use crate::utils::decay::residual_bid_percent;
use crate::utils::retry::retry_delay;
use crate::utils::shutdown::wait_for_shutdown;
use alloy::primitives::{Address, B256};
use kanau::processor::Processor;
use preconf_sdk::objects::{Commitment, Settlement, SettlementType, Winner};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors that abort the processing of a winner.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// Chain RPC error
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The block tracker has no identity for the builder.
    #[error("builder {0:?} is not registered")]
    UnknownBuilder(String),

    /// The L1 node does not know the block.
    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// The winner carries a negative block number.
    #[error("invalid block number {0}")]
    InvalidBlockNumber(i64),
}

/// Classify a commitment of a block won by `builder`.
///
/// Commitments of other committers are returned. A commitment of the builder
/// is rewarded only if every committed transaction is in the block; anything
/// else, including a reference that does not parse, is slashed.
pub fn classify(commitment: &Commitment, builder: Address, block_transactions: &HashSet<B256>) -> SettlementType {
    if commitment.committer != builder {
        return SettlementType::Return;
    }
    match commitment.transaction_hashes() {
        Ok(hashes) if hashes.iter().all(|hash| block_transactions.contains(hash)) => {
            SettlementType::Reward
        }
        Ok(_) => SettlementType::Slash,
        Err(e) => {
            warn!(commitment_index = %commitment.index, error = %e, "Unusable transaction reference");
            SettlementType::Slash
        }
    }
}

/// Settlement decision engine.
pub struct Updater {
    store: Arc<dyn OracleStore>,
    blocks: Arc<dyn BlockSource>,
    commitments: Arc<dyn CommitmentSource>,
    registry: Arc<dyn BuilderRegistry>,
    config: UpdaterConfig,
    /// Builder name to identity. Filled on first lookup, never invalidated.
    builders: Mutex<HashMap<String, Address>>,
}

impl Updater {
    pub fn new(
        store: Arc<dyn OracleStore>,
        blocks: Arc<dyn BlockSource>,
        commitments: Arc<dyn CommitmentSource>,
        registry: Arc<dyn BuilderRegistry>,
        config: UpdaterConfig,
    ) -> Self {
        Self {
            store,
            blocks,
            commitments,
            registry,
            config,
            builders: Mutex::new(HashMap::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Address>> {
        self.builders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn builder_address(&self, builder: &str) -> Result<Address, UpdaterError> {
        if let Some(address) = self.cache().get(builder) {
            return Ok(*address);
        }
        let address = self.registry.builder_address(builder).await?;
        if address.is_zero() {
            return Err(UpdaterError::UnknownBuilder(builder.to_owned()));
        }
        debug!(builder, %address, "Resolved builder");
        self.cache().insert(builder.to_owned(), address);
        Ok(address)
    }

    /// Run the Updater until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut failures = 0u32;

        'subscription: loop {
            let mut winners = self.store.subscribe_winners(shutdown_rx.clone());
            info!("Updater subscribed to winners");

            loop {
                let winner = tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown_rx) => break 'subscription,
                    winner = winners.recv() => match winner {
                        Some(winner) => winner,
                        None => {
                            info!("Winner subscription closed");
                            break 'subscription;
                        }
                    },
                };

                let block_number = winner.block_number;
                let builder = winner.builder.clone();
                match self.process(winner).await {
                    Ok(settlements) => {
                        failures = 0;
                        info!(block_number, builder, settlements, "Winner processed");
                    }
                    Err(e) => {
                        let delay = retry_delay(failures, self.config.max_retry_exponent);
                        failures = failures.saturating_add(1);
                        error!(
                            block_number,
                            builder,
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "Failed to process winner"
                        );
                        drop(winners);
                        tokio::select! {
                            biased;
                            _ = wait_for_shutdown(&mut shutdown_rx) => break 'subscription,
                            _ = tokio::time::sleep(delay) => continue 'subscription,
                        }
                    }
                }
            }
        }

        info!("Updater shutdown complete");
    }
}

impl Processor<Winner> for Updater {
    /// Number of settlements newly recorded.
    type Output = usize;
    type Error = UpdaterError;

    #[tracing::instrument(skip_all, err, fields(block_number = winner.block_number, builder = %winner.builder))]
    async fn process(&self, winner: Winner) -> Result<usize, UpdaterError> {
        let block_number = u64::try_from(winner.block_number)
            .map_err(|_| UpdaterError::InvalidBlockNumber(winner.block_number))?;
        let builder = self.builder_address(&winner.builder).await?;

        let block_transactions: HashSet<B256> = self
            .blocks
            .block_transactions(block_number)
            .await?
            .ok_or(UpdaterError::BlockNotFound(block_number))?
            .into_iter()
            .collect();

        let indexes = self.commitments.commitments_by_block_number(block_number).await?;
        debug!(commitments = indexes.len(), transactions = block_transactions.len(), "Evaluating block");

        let mut added = 0;
        for index in indexes {
            let commitment = self.commitments.commitment(index).await?;
            let settlement_type = classify(&commitment, builder, &block_transactions);
            let bundle = commitment.is_bundle();
            let decay = residual_bid_percent(
                commitment.decay_start_timestamp,
                commitment.decay_end_timestamp,
                commitment.dispatch_timestamp,
            );
            let settlement = Settlement {
                commitment_index: index,
                transaction: commitment.transaction_reference,
                block_number: winner.block_number,
                builder: winner.builder.clone(),
                amount: commitment.bid,
                bid_id: commitment.bid_hash,
                settlement_type,
                // at most 100
                decay_percentage: decay as i64,
                window: winner.window,
            };

            if self.store.add_settlement(&settlement).await? {
                added += 1;
                debug!(commitment_index = %index, %settlement_type, decay, bundle, "Settlement recorded");
            } else {
                debug!(commitment_index = %index, "Settlement already recorded");
            }
        }

        self.store.update_complete(winner.block_number).await?;
        Ok(added)
    }
}
