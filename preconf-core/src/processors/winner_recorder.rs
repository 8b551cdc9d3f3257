//! WinnerRecorder processor.
//!
//! Receives `NewL1Block` events through the dispatcher and registers the
//! announced winner in the store, where the Updater picks it up.

use crate::dispatcher::{DispatchError, EventDispatcher, Subscription, TypedEventHandler};
use crate::events::{AnnouncedWinnerReceiver, announced_winner_channel, winner_from_log};
use crate::storage::OracleStore;
use crate::utils::retry::retry_delay;
use crate::utils::shutdown::wait_for_shutdown;
use preconf_sdk::contracts::IBlockTracker::NewL1Block;
use preconf_sdk::objects::Winner;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct WinnerRecorder {
    store: Arc<dyn OracleStore>,
    /// Cap on the backoff exponent of failed registrations.
    max_retry_exponent: u32,
    subscription: Subscription,
    winners: AnnouncedWinnerReceiver,
}

impl WinnerRecorder {
    /// Create a WinnerRecorder, subscribing to `NewL1Block` on `dispatcher`.
    pub fn new(
        dispatcher: &EventDispatcher,
        store: Arc<dyn OracleStore>,
        max_retry_exponent: u32,
    ) -> Result<Self, DispatchError> {
        let (winner_tx, winners) = announced_winner_channel();
        let subscription = dispatcher.subscribe(TypedEventHandler::new(move |event: NewL1Block| {
            let winner = winner_from_log(&event).ok_or("block or window number out of range")?;
            winner_tx.send(winner)?;
            Ok(())
        }))?;
        Ok(Self {
            store,
            max_retry_exponent,
            subscription,
            winners,
        })
    }

    /// Run until shutdown is signaled or the dispatcher fails.
    ///
    /// Registration is idempotent; a failed write is retried with backoff
    /// until it succeeds.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), DispatchError> {
        let result = loop {
            let winner = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break Ok(()),
                Some(e) = self.subscription.err() => break Err(e),
                winner = self.winners.recv() => match winner {
                    Some(winner) => winner,
                    None => break Ok(()),
                },
            };
            if !self.register(&winner, &mut shutdown_rx).await {
                break Ok(());
            }
        };

        // The cursor has already moved past winners still queued.
        while let Ok(winner) = self.winners.try_recv() {
            if !self.register(&winner, &mut shutdown_rx).await {
                warn!(block_number = winner.block_number, "Winner dropped during shutdown");
                break;
            }
        }

        match &result {
            Ok(()) => info!("WinnerRecorder shutdown complete"),
            Err(e) => error!(error = %e, "WinnerRecorder stopped"),
        }
        result
    }

    /// Returns `false` if shutdown interrupted the registration.
    async fn register(&self, winner: &Winner, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let mut failures = 0u32;
        loop {
            match self.store.register_winner(winner).await {
                Ok(()) => {
                    debug!(
                        block_number = winner.block_number,
                        builder = %winner.builder,
                        window = winner.window,
                        "Winner registered"
                    );
                    return true;
                }
                Err(e) => {
                    let delay = retry_delay(failures, self.max_retry_exponent);
                    failures = failures.saturating_add(1);
                    warn!(
                        block_number = winner.block_number,
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "Failed to register winner"
                    );
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(shutdown_rx) => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ContractInterface;
    use crate::storage::InMemoryStore;
    use crate::testing::{ChannelLogSource, encode_log};
    use crate::utils::retry::DEFAULT_MAX_RETRY_EXPONENT;
    use alloy::primitives::{Address, U256};
    use std::time::Duration;

    #[tokio::test]
    async fn announced_winners_reach_the_store() {
        let tracker = Address::repeat_byte(0x11);
        let store = Arc::new(InMemoryStore::new());
        let (source, logs) = ChannelLogSource::new();
        let dispatcher = EventDispatcher::new(
            vec![(tracker, ContractInterface::block_tracker())],
            Arc::new(source),
            store.clone(),
            None,
        );
        let recorder =
            WinnerRecorder::new(&dispatcher, store.clone(), DEFAULT_MAX_RETRY_EXPONENT).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut winners = store.subscribe_winners(shutdown_rx.clone());
        tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { dispatcher.run(shutdown_rx).await }
        });
        let recorder = tokio::spawn(recorder.run(shutdown_rx));

        for block in [7u64, 7, 8] {
            let event = NewL1Block {
                blockNumber: U256::from(block),
                winner: format!("builder-{block}"),
                window: U256::from(1),
            };
            logs.send(encode_log(tracker, &event, 100 + block)).unwrap();
        }

        let first = tokio::time::timeout(Duration::from_secs(1), winners.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), winners.recv()).await.unwrap().unwrap();
        assert_eq!((first.block_number, first.builder.as_str()), (7, "builder-7"));
        assert_eq!((second.block_number, second.builder.as_str()), (8, "builder-8"));

        shutdown_tx.send_replace(true);
        assert_eq!(recorder.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn queued_winners_are_kept_when_the_dispatcher_fails() {
        let tracker = Address::repeat_byte(0x11);
        let store = Arc::new(InMemoryStore::new());
        let (source, logs) = ChannelLogSource::new();
        let dispatcher = EventDispatcher::new(
            vec![(tracker, ContractInterface::block_tracker())],
            Arc::new(source),
            store.clone(),
            None,
        );
        let recorder =
            WinnerRecorder::new(&dispatcher, store.clone(), DEFAULT_MAX_RETRY_EXPONENT).unwrap();

        let event = NewL1Block {
            blockNumber: U256::from(12),
            winner: "builder-a".into(),
            window: U256::from(2),
        };
        logs.send(encode_log(tracker, &event, 130)).unwrap();
        drop(logs);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatched = dispatcher.run(shutdown_rx.clone()).await;
        assert_eq!(dispatched, Err(DispatchError::StreamEnded));

        let result = tokio::time::timeout(Duration::from_secs(1), recorder.run(shutdown_rx))
            .await
            .unwrap();
        assert_eq!(result, Err(DispatchError::StreamEnded));
        assert_eq!(store.is_winner_processed(12), Some(false));
    }
}
