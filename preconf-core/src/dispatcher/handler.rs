//! Typed event handlers.

use super::DispatchError;
use super::contract::{ContractInterface, event_name};
use alloy::primitives::B256;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::marker::PhantomData;

/// Error returned by an event callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A handler for one contract event.
///
/// The dispatcher binds a handler to the topic and contract of its event on
/// subscription; `handle` fails on an unbound handler.
pub trait EventHandler: Send + Sync {
    /// Event name, which is also the handler's identity.
    fn name(&self) -> &str;

    fn set_topic_and_contract(&mut self, topic: B256, contract: ContractInterface);

    fn topic(&self) -> Option<B256>;

    fn contract(&self) -> Option<&ContractInterface>;

    /// Decode `log` and invoke the callback.
    fn handle(&self, log: &Log) -> Result<(), DispatchError>;
}

/// An [`EventHandler`] decoding logs into the binding `E`.
pub struct TypedEventHandler<E, F> {
    binding: Option<(B256, ContractInterface)>,
    callback: F,
    _event: PhantomData<fn() -> E>,
}

impl<E, F> TypedEventHandler<E, F>
where
    E: SolEvent,
    F: Fn(E) -> Result<(), CallbackError> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            binding: None,
            callback,
            _event: PhantomData,
        }
    }
}

impl<E, F> EventHandler for TypedEventHandler<E, F>
where
    E: SolEvent,
    F: Fn(E) -> Result<(), CallbackError> + Send + Sync,
{
    fn name(&self) -> &str {
        event_name::<E>()
    }

    fn set_topic_and_contract(&mut self, topic: B256, contract: ContractInterface) {
        self.binding = Some((topic, contract));
    }

    fn topic(&self) -> Option<B256> {
        self.binding.as_ref().map(|(topic, _)| *topic)
    }

    fn contract(&self) -> Option<&ContractInterface> {
        self.binding.as_ref().map(|(_, contract)| contract)
    }

    fn handle(&self, log: &Log) -> Result<(), DispatchError> {
        if self.binding.is_none() {
            return Err(DispatchError::UnboundHandler(self.name().to_owned()));
        }
        let event = E::decode_log(&log.inner).map_err(|e| DispatchError::Decode {
            event: self.name().to_owned(),
            block_number: log.block_number,
            reason: e.to_string(),
        })?;
        (self.callback)(event.data).map_err(|e| DispatchError::Callback {
            event: self.name().to_owned(),
            block_number: log.block_number,
            reason: e.to_string(),
        })
    }
}
