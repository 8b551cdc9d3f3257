//! Application state shared across all request handlers.

use preconf_core::processors::Transactor;
use preconf_core::storage::OracleStore;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Oracle storage.
    pub store: Arc<dyn OracleStore>,
    /// The settlement transaction sequencer.
    pub transactor: Arc<Transactor>,
}

impl AppState {
    pub fn new(store: Arc<dyn OracleStore>, transactor: Arc<Transactor>) -> Self {
        Self { store, transactor }
    }
}
