pub mod commitment;
pub mod settlement;

pub use commitment::{BUNDLE_DELIMITER, Commitment, InvalidTransactionReference};
pub use settlement::{Settlement, SettlementType, Winner};
