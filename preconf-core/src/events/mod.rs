//! Events decoded from the settlement chain and the channels carrying them.
//!
//! # Event Flow
//!
//! 1. `IBlockTracker::NewL1Block` -> `WinnerRecorder` -> store
//! 2. `IBlockTracker::NewWindow` -> `WindowOpened` -> `Settler`
//!
//! Events are ephemeral. The store holds everything a processor needs to
//! resume after a restart.

pub mod channels;
pub mod types;

pub use channels::{
    AnnouncedWinnerReceiver, AnnouncedWinnerSender, WindowOpenedReceiver, WindowOpenedSender,
    announced_winner_channel, window_opened_channel,
};
pub use types::{WindowOpened, winner_from_log};
