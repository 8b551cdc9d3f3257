//! Processors of the settlement pipeline.
//!
//! - `WinnerRecorder`: Receives `NewL1Block`, registers winners in the store
//! - `Updater`: Receives winners from the store, writes settlements
//! - `Settler`: Receives `NewWindow`, posts the settlements of window N-2
//! - `Transactor`: Sends the Settler's transactions in nonce order and tracks
//!   their finalization

pub mod settler;
pub mod transactor;
pub mod updater;
pub mod winner_recorder;

pub use settler::{Settler, SettlerError};
pub use transactor::{Transactor, TransactorError};
pub use updater::{Updater, UpdaterError, classify};
pub use winner_recorder::WinnerRecorder;
