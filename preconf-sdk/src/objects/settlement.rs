use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating one commitment against the winning block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementType {
    /// Every committed transaction landed in the block.
    Reward,
    /// At least one committed transaction is missing from the block.
    Slash,
    /// The commitment was made by a builder that did not win the block.
    /// Informational only, never posted on-chain.
    Return,
}

impl SettlementType {
    /// Whether this outcome results in a transaction on the settlement chain.
    pub fn is_settled_on_chain(self) -> bool {
        !matches!(self, SettlementType::Return)
    }
}

impl std::fmt::Display for SettlementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementType::Reward => write!(f, "reward"),
            SettlementType::Slash => write!(f, "slash"),
            SettlementType::Return => write!(f, "return"),
        }
    }
}

/// The builder that won an L1 block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub block_number: i64,
    /// Builder name as announced by the block tracker.
    pub builder: String,
    pub window: i64,
}

/// A decided settlement waiting to be posted to the oracle contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub commitment_index: B256,
    /// Transaction reference as committed: one hash or a comma-joined bundle.
    pub transaction: String,
    pub block_number: i64,
    pub builder: String,
    pub amount: u64,
    pub bid_id: B256,
    pub settlement_type: SettlementType,
    /// Residual bid percentage after decay, 0-100.
    pub decay_percentage: i64,
    pub window: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_type_serializes_lowercase() {
        let json = serde_json::to_string(&SettlementType::Slash).unwrap();
        assert_eq!(json, "\"slash\"");
        let parsed: SettlementType = serde_json::from_str("\"return\"").unwrap();
        assert_eq!(parsed, SettlementType::Return);
    }

    #[test]
    fn only_return_stays_off_chain() {
        assert!(SettlementType::Reward.is_settled_on_chain());
        assert!(SettlementType::Slash.is_settled_on_chain());
        assert!(!SettlementType::Return.is_settled_on_chain());
    }
}
