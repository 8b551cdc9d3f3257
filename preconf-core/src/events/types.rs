//! Event type definitions.

use preconf_sdk::contracts::IBlockTracker::{NewL1Block, NewWindow};
use preconf_sdk::objects::Winner;

/// Emitted when the block tracker opens a new settlement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOpened {
    pub window: i64,
}

impl WindowOpened {
    /// Convert a decoded `NewWindow` log. Returns `None` for windows that do
    /// not fit an `i64`.
    pub fn from_log(event: &NewWindow) -> Option<Self> {
        i64::try_from(event.window).ok().map(|window| Self { window })
    }

    /// The window whose settlements become due when this one opens.
    ///
    /// Settlement lags two windows behind, so windows 0 and 1 settle nothing.
    pub fn settlement_window(&self) -> Option<i64> {
        (self.window >= 2).then(|| self.window - 2)
    }
}

/// Convert a decoded `NewL1Block` log into the winner it announces. Returns
/// `None` when a number does not fit an `i64`.
pub fn winner_from_log(event: &NewL1Block) -> Option<Winner> {
    Some(Winner {
        block_number: i64::try_from(event.blockNumber).ok()?,
        builder: event.winner.clone(),
        window: i64::try_from(event.window).ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    #[test]
    fn settlement_lags_two_windows() {
        let event = WindowOpened::from_log(&NewWindow { window: U256::from(102) }).unwrap();
        assert_eq!(event.settlement_window(), Some(100));
        assert_eq!(WindowOpened { window: 2 }.settlement_window(), Some(0));
        assert_eq!(WindowOpened { window: 1 }.settlement_window(), None);
    }

    #[test]
    fn oversized_window_is_rejected() {
        assert!(WindowOpened::from_log(&NewWindow { window: U256::MAX }).is_none());
    }

    #[test]
    fn winner_is_taken_from_the_log() {
        let event = NewL1Block {
            blockNumber: U256::from(21_000_000u64),
            winner: "titan".into(),
            window: U256::from(3),
        };
        let winner = winner_from_log(&event).unwrap();
        assert_eq!(winner.block_number, 21_000_000);
        assert_eq!(winner.builder, "titan");
        assert_eq!(winner.window, 3);
    }
}
