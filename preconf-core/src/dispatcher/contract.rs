//! Contract interface descriptors.

use alloy::primitives::B256;
use alloy::sol_types::SolEvent;
use preconf_sdk::contracts::IBlockTracker;
use std::collections::HashMap;

/// A named table of the events a contract emits, mapping event names to
/// their topic (the hash of the event signature).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInterface {
    name: String,
    events: HashMap<String, B256>,
}

impl ContractInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: HashMap::new(),
        }
    }

    /// Add an event from its typed binding.
    pub fn with_event<E: SolEvent>(mut self) -> Self {
        self.events.insert(event_name::<E>().to_owned(), E::SIGNATURE_HASH);
        self
    }

    /// The block tracker contract: winners and settlement windows.
    pub fn block_tracker() -> Self {
        Self::new("IBlockTracker")
            .with_event::<IBlockTracker::NewL1Block>()
            .with_event::<IBlockTracker::NewWindow>()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic of the event called `event`, if the contract emits it.
    pub fn event_topic(&self, event: &str) -> Option<B256> {
        self.events.get(event).copied()
    }
}

/// Name of an event binding, e.g. `NewWindow` for `NewWindow(uint256)`.
pub fn event_name<E: SolEvent>() -> &'static str {
    E::SIGNATURE.split('(').next().unwrap_or(E::SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use IBlockTracker::{NewL1Block, NewWindow};

    #[test]
    fn block_tracker_exposes_its_events() {
        let contract = ContractInterface::block_tracker();
        assert_eq!(contract.name(), "IBlockTracker");
        assert_eq!(contract.event_topic("NewWindow"), Some(NewWindow::SIGNATURE_HASH));
        assert_eq!(contract.event_topic("NewL1Block"), Some(NewL1Block::SIGNATURE_HASH));
        assert_eq!(contract.event_topic("Transfer"), None);
    }

    #[test]
    fn event_name_strips_parameters() {
        assert_eq!(event_name::<NewL1Block>(), "NewL1Block");
    }
}
