//! Settler processor.
//!
//! The Settler is responsible for:
//! - Receiving `NewWindow` events through the dispatcher
//! - Starting a worker for window N-2 when window N opens
//! - Posting each reward or slash of that window to the oracle contract
//!   through the Transactor, in delivery order
//! - Recording the transaction hash and nonce of every posted settlement
//!
//! A worker is only stopped between settlements, never while one is being
//! posted. Any error is terminal.

use crate::dispatcher::{DispatchError, EventDispatcher, Subscription, TypedEventHandler};
use crate::events::{WindowOpened, WindowOpenedReceiver, window_opened_channel};
use crate::processors::transactor::{Transactor, TransactorError, request_with_nonce};
use crate::storage::{OracleStore, StorageError};
use crate::utils::shutdown::wait_for_shutdown;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use preconf_sdk::contracts::IBlockTracker::NewWindow;
use preconf_sdk::contracts::IOracle;
use preconf_sdk::objects::{Settlement, SettlementType};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Errors that stop the Settler.
#[derive(Debug, Error)]
pub enum SettlerError {
    /// Transactor error
    #[error("transactor error: {0}")]
    Transactor(#[from] TransactorError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The dispatcher failed or could not register the window handler.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A stored settlement cannot be encoded as a contract call.
    #[error("invalid settlement {commitment_index}: {reason}")]
    InvalidSettlement { commitment_index: B256, reason: String },

    /// A window worker panicked or was aborted.
    #[error("window {window} worker failed: {reason}")]
    Worker { window: i64, reason: String },
}

/// Posts settlements of a window to the oracle contract.
#[derive(Clone)]
struct WindowSettler {
    store: Arc<dyn OracleStore>,
    transactor: Arc<Transactor>,
    oracle: Address,
}

impl WindowSettler {
    async fn run(
        self,
        window: i64,
        mut cancel_rx: watch::Receiver<bool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SettlerError> {
        let mut settlements = self.store.subscribe_settlements(window, shutdown_rx.clone());
        info!(window, "Settling window");

        loop {
            let settlement = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => return Ok(()),
                _ = wait_for_shutdown(&mut cancel_rx) => {
                    debug!(window, "Window worker cancelled");
                    return Ok(());
                }
                settlement = settlements.recv() => match settlement {
                    Some(settlement) => settlement,
                    None => return Ok(()),
                },
            };

            match self.settle(&settlement).await {
                Ok(()) => {}
                Err(SettlerError::Transactor(TransactorError::Shutdown)) => return Ok(()),
                Err(e) => {
                    error!(
                        window,
                        commitment_index = %settlement.commitment_index,
                        block_number = settlement.block_number,
                        error = %e,
                        "Failed to settle commitment"
                    );
                    return Err(e);
                }
            }
        }
    }

    #[tracing::instrument(skip_all, err, fields(commitment_index = %settlement.commitment_index, window = settlement.window))]
    async fn settle(&self, settlement: &Settlement) -> Result<(), SettlerError> {
        if !settlement.settlement_type.is_settled_on_chain() {
            info!(builder = %settlement.builder, "Skipping return settlement");
            return Ok(());
        }

        let call = self.encode(settlement)?;
        let nonce = self.transactor.allocate_nonce().await?;
        let tx = request_with_nonce(&self.transactor, nonce)
            .with_to(self.oracle)
            .with_input(call.abi_encode());
        let hash = self.transactor.send(tx).await?;
        self.store
            .settlement_initiated(settlement.commitment_index, hash, nonce)
            .await?;

        info!(
            nonce,
            %hash,
            settlement_type = %settlement.settlement_type,
            block_number = settlement.block_number,
            "Settlement initiated"
        );
        Ok(())
    }

    fn encode(
        &self,
        settlement: &Settlement,
    ) -> Result<IOracle::processBuilderCommitmentForBlockNumberCall, SettlerError> {
        let invalid = |reason: &str| SettlerError::InvalidSettlement {
            commitment_index: settlement.commitment_index,
            reason: reason.to_owned(),
        };
        let block_number =
            u64::try_from(settlement.block_number).map_err(|_| invalid("negative block number"))?;
        let decay = u64::try_from(settlement.decay_percentage)
            .map_err(|_| invalid("negative decay percentage"))?;

        Ok(IOracle::processBuilderCommitmentForBlockNumberCall {
            commitmentIdx: settlement.commitment_index,
            blockNumber: U256::from(block_number),
            builder: settlement.builder.clone(),
            isSlash: settlement.settlement_type == SettlementType::Slash,
            residualBidPercentAfterDecay: U256::from(decay),
        })
    }
}

struct WindowWorker {
    window: i64,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<(), SettlerError>>,
}

impl WindowWorker {
    /// Stop the worker after the settlement in progress, if any.
    async fn stop(self) -> Result<(), SettlerError> {
        self.cancel_tx.send_replace(true);
        join_worker(self.window, self.handle).await
    }
}

async fn join_worker(
    window: i64,
    handle: impl Future<Output = Result<Result<(), SettlerError>, tokio::task::JoinError>>,
) -> Result<(), SettlerError> {
    handle.await.map_err(|e| SettlerError::Worker {
        window,
        reason: e.to_string(),
    })?
}

/// Resolves when the current worker finishes; never without one.
async fn worker_finished(worker: &mut Option<WindowWorker>) -> (i64, Result<(), SettlerError>) {
    match worker {
        Some(worker) => {
            let result = join_worker(worker.window, &mut worker.handle).await;
            (worker.window, result)
        }
        None => std::future::pending().await,
    }
}

/// Settlement orchestrator, paced by settlement windows.
pub struct Settler {
    settler: WindowSettler,
    subscription: Subscription,
    windows: WindowOpenedReceiver,
}

impl Settler {
    /// Create a Settler, subscribing to `NewWindow` on `dispatcher`.
    ///
    /// Must be created before the dispatcher runs, or windows opened in
    /// between are missed.
    pub fn new(
        dispatcher: &EventDispatcher,
        store: Arc<dyn OracleStore>,
        transactor: Arc<Transactor>,
        oracle: Address,
    ) -> Result<Self, SettlerError> {
        let (window_tx, windows) = window_opened_channel();
        let subscription = dispatcher.subscribe(TypedEventHandler::new(move |event: NewWindow| {
            let opened = WindowOpened::from_log(&event).ok_or("window number out of range")?;
            window_tx.send(opened)?;
            Ok(())
        }))?;

        Ok(Self {
            settler: WindowSettler {
                store,
                transactor,
                oracle,
            },
            subscription,
            windows,
        })
    }

    /// Run the Settler until shutdown is signaled or an error occurs.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), SettlerError> {
        let mut last_window: Option<i64> = None;
        let mut worker: Option<WindowWorker> = None;

        let result = loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown_rx) => break Ok(()),

                Some(e) = self.subscription.err() => break Err(e.into()),

                (window, result) = worker_finished(&mut worker) => {
                    worker = None;
                    match result {
                        Ok(()) => debug!(window, "Window worker finished"),
                        Err(e) => break Err(e),
                    }
                }

                opened = self.windows.recv() => {
                    let Some(opened) = opened else {
                        info!("Window channel closed");
                        break Ok(());
                    };
                    if last_window.is_some_and(|last| opened.window <= last) {
                        debug!(window = opened.window, ?last_window, "Ignoring stale window");
                        continue;
                    }
                    last_window = Some(opened.window);

                    let Some(target) = opened.settlement_window() else {
                        debug!(window = opened.window, "Nothing to settle yet");
                        continue;
                    };
                    info!(window = opened.window, settlement_window = target, "New window opened");

                    if let Some(previous) = worker.take()
                        && let Err(e) = previous.stop().await
                    {
                        break Err(e);
                    }
                    worker = Some(self.spawn_worker(target, shutdown_rx.clone()));
                }
            }
        };

        if let Some(worker) = worker
            && let Err(e) = worker.stop().await
        {
            error!(error = %e, "Window worker failed during shutdown");
        }
        match &result {
            Ok(()) => info!("Settler shutdown complete"),
            Err(e) => error!(error = %e, "Settler stopped"),
        }
        result
    }

    fn spawn_worker(&self, window: i64, shutdown_rx: watch::Receiver<bool>) -> WindowWorker {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(self.settler.clone().run(window, cancel_rx, shutdown_rx));
        WindowWorker {
            window,
            cancel_tx,
            handle,
        }
    }
}
