//! Contract log dispatch.
//!
//! The [`EventDispatcher`] reads the logs of a set of contracts from a
//! [`LogSource`], decodes each into the typed event of the handler registered
//! for its topic and invokes the handler's callback. Dispatch is fail-fast: a
//! decode or callback error stops the loop and is delivered to every live
//! [`Subscription`].
//!
//! Logs of unknown contracts or unregistered topics are skipped.

mod contract;
mod handler;

pub use contract::{ContractInterface, event_name};
pub use handler::{CallbackError, EventHandler, TypedEventHandler};

use crate::chain::LogSource;
use crate::storage::BlockCursor;
use crate::utils::shutdown::wait_for_shutdown;
use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, trace};

/// Errors of the dispatch loop and of subscription.
///
/// Cloned into every live subscription when the loop fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No contract exposes an event with this name.
    #[error("no contract exposes event {0}")]
    UnknownEvent(String),

    /// A live subscription already exists for this event.
    #[error("event {0} already has a subscriber")]
    AlreadySubscribed(String),

    /// The handler was used before being bound to a topic.
    #[error("handler {0} is not bound to a topic")]
    UnboundHandler(String),

    /// A log of a registered topic does not match its event.
    #[error("failed to decode {event} at block {block_number:?}: {reason}")]
    Decode {
        event: String,
        block_number: Option<u64>,
        reason: String,
    },

    /// The callback rejected an event.
    #[error("handler {event} failed at block {block_number:?}: {reason}")]
    Callback {
        event: String,
        block_number: Option<u64>,
        reason: String,
    },

    /// The log source failed.
    #[error("log source error: {0}")]
    Source(String),

    /// The log stream ended.
    #[error("log stream ended")]
    StreamEnded,

    /// The block cursor could not be read or written.
    #[error("block cursor error: {0}")]
    Cursor(String),
}

struct Registration {
    id: u64,
    handler: Arc<dyn EventHandler>,
    err_tx: Option<oneshot::Sender<DispatchError>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_name: HashMap<String, Registration>,
    by_topic: HashMap<B256, String>,
}

impl Registry {
    fn remove(&mut self, id: u64, name: &str) {
        let matches = self.by_name.get(name).is_some_and(|r| r.id == id);
        if !matches {
            return;
        }
        if let Some(registration) = self.by_name.remove(name)
            && let Some(topic) = registration.handler.topic()
        {
            self.by_topic.remove(&topic);
        }
    }

    fn handler_for(&self, contract: &ContractInterface, topic: &B256) -> Option<Arc<dyn EventHandler>> {
        let name = self.by_topic.get(topic)?;
        let registration = self.by_name.get(name)?;
        let bound = registration
            .handler
            .contract()
            .is_some_and(|c| c.name() == contract.name());
        bound.then(|| registration.handler.clone())
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle of a registered handler.
///
/// Dropping the subscription unsubscribes the handler.
pub struct Subscription {
    id: u64,
    name: String,
    registry: Arc<Mutex<Registry>>,
    err_rx: Option<oneshot::Receiver<DispatchError>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Event name of the handler.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the handler from the dispatcher.
    pub fn unsubscribe(&mut self) {
        lock(&self.registry).remove(self.id, &self.name);
    }

    /// Wait for the error that stopped the dispatcher.
    ///
    /// Returns `None` once unsubscribed, or when the dispatcher is gone
    /// without failing.
    pub async fn err(&mut self) -> Option<DispatchError> {
        let rx = self.err_rx.as_mut()?;
        let result = rx.await.ok();
        self.err_rx = None;
        result
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Routes contract logs to typed event handlers.
pub struct EventDispatcher {
    contracts: HashMap<Address, ContractInterface>,
    /// Contracts in construction order; the first one exposing an event wins.
    order: Vec<Address>,
    registry: Arc<Mutex<Registry>>,
    source: Arc<dyn LogSource>,
    cursor: Arc<dyn BlockCursor>,
    start_block: Option<u64>,
}

impl EventDispatcher {
    pub fn new(
        contracts: Vec<(Address, ContractInterface)>,
        source: Arc<dyn LogSource>,
        cursor: Arc<dyn BlockCursor>,
        start_block: Option<u64>,
    ) -> Self {
        let order = contracts.iter().map(|(address, _)| *address).collect();
        Self {
            contracts: contracts.into_iter().collect(),
            order,
            registry: Arc::new(Mutex::new(Registry::default())),
            source,
            cursor,
            start_block,
        }
    }

    /// Register `handler` for its event.
    pub fn subscribe<H: EventHandler + 'static>(&self, mut handler: H) -> Result<Subscription, DispatchError> {
        let name = handler.name().to_owned();
        let (topic, contract) = self
            .order
            .iter()
            .filter_map(|address| self.contracts.get(address))
            .find_map(|contract| contract.event_topic(&name).map(|topic| (topic, contract.clone())))
            .ok_or_else(|| DispatchError::UnknownEvent(name.clone()))?;

        let mut registry = lock(&self.registry);
        if registry.by_name.contains_key(&name) {
            return Err(DispatchError::AlreadySubscribed(name));
        }

        debug!(event = %name, contract = contract.name(), %topic, "Subscribing handler");
        handler.set_topic_and_contract(topic, contract);

        let id = registry.next_id;
        registry.next_id += 1;
        let (err_tx, err_rx) = oneshot::channel();
        registry.by_topic.insert(topic, name.clone());
        registry.by_name.insert(
            name.clone(),
            Registration {
                id,
                handler: Arc::new(handler),
                err_tx: Some(err_tx),
            },
        );

        Ok(Subscription {
            id,
            name,
            registry: self.registry.clone(),
            err_rx: Some(err_rx),
        })
    }

    /// Run the dispatch loop until shutdown or the first fatal error.
    ///
    /// Resumes from the stored block cursor, or from the configured start
    /// block on first start. The block of the last dispatched log is replayed
    /// on resume, so handlers must tolerate seeing a log twice.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), DispatchError> {
        let result = self.dispatch(&mut shutdown_rx).await;
        match &result {
            Ok(()) => info!("Event dispatcher shutting down"),
            Err(e) => {
                error!(error = %e, "Event dispatcher stopped");
                self.fail_subscriptions(e);
            }
        }
        result
    }

    async fn dispatch(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), DispatchError> {
        let mut last_persisted = self
            .cursor
            .last_block()
            .await
            .map_err(|e| DispatchError::Cursor(e.to_string()))?;
        let from_block = last_persisted.or(self.start_block);
        info!(?from_block, contracts = self.order.len(), "Event dispatcher starting");

        let mut logs = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown_rx) => return Ok(()),
            logs = self.source.stream_logs(self.order.clone(), from_block) => {
                logs.map_err(|e| DispatchError::Source(e.to_string()))?
            }
        };

        loop {
            let log = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown_rx) => return Ok(()),
                log = logs.next() => log.ok_or(DispatchError::StreamEnded)?,
            };

            self.dispatch_log(&log)?;

            if let Some(block_number) = log.block_number
                && last_persisted.is_none_or(|last| block_number > last)
            {
                self.cursor
                    .set_last_block(block_number)
                    .await
                    .map_err(|e| DispatchError::Cursor(e.to_string()))?;
                last_persisted = Some(block_number);
            }
        }
    }

    fn dispatch_log(&self, log: &Log) -> Result<(), DispatchError> {
        let Some(contract) = self.contracts.get(&log.address()) else {
            trace!(address = %log.address(), "Skipping log of unknown contract");
            return Ok(());
        };
        let Some(topic) = log.topic0() else {
            trace!(address = %log.address(), "Skipping anonymous log");
            return Ok(());
        };
        // Invoked outside the lock so callbacks may subscribe or unsubscribe.
        let handler = lock(&self.registry).handler_for(contract, topic);
        let Some(handler) = handler else {
            trace!(contract = contract.name(), %topic, "Skipping unregistered topic");
            return Ok(());
        };
        handler.handle(log)
    }

    fn fail_subscriptions(&self, err: &DispatchError) {
        let mut registry = lock(&self.registry);
        for registration in registry.by_name.values_mut() {
            if let Some(tx) = registration.err_tx.take() {
                let _ = tx.send(err.clone());
            }
        }
    }
}
