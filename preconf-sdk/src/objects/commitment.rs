use crate::contracts::IPreconfStore::PreConfCommitment;
use alloy::primitives::{Address, B256, Bytes};
use smallvec::SmallVec;
use thiserror::Error;

/// Separator between transaction hashes of a bundle commitment.
pub const BUNDLE_DELIMITER: char = ',';

/// A transaction reference that does not parse into a list of hashes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTransactionReference {
    #[error("transaction reference is empty")]
    Empty,
    #[error("invalid transaction hash {0:?}")]
    InvalidHash(String),
}

/// A pre-confirmation commitment as stored on the settlement chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub index: B256,
    pub bidder: Address,
    pub committer: Address,
    pub bid: u64,
    pub block_number: u64,
    pub transaction_reference: String,
    pub bid_hash: B256,
    pub bid_signature: Bytes,
    pub commitment_signature: Bytes,
    pub decay_start_timestamp: u64,
    pub decay_end_timestamp: u64,
    pub dispatch_timestamp: u64,
}

impl Commitment {
    /// Build a commitment from its contract representation.
    pub fn from_contract(index: B256, raw: PreConfCommitment) -> Self {
        Self {
            index,
            bidder: raw.bidder,
            committer: raw.commiter,
            bid: raw.bid,
            block_number: raw.blockNumber,
            transaction_reference: raw.txnHash,
            bid_hash: raw.bidHash,
            bid_signature: raw.bidSignature,
            commitment_signature: raw.commitmentSignature,
            decay_start_timestamp: raw.decayStartTimeStamp,
            decay_end_timestamp: raw.decayEndTimeStamp,
            dispatch_timestamp: raw.dispatchTimestamp,
        }
    }

    /// Whether the commitment covers more than one transaction.
    pub fn is_bundle(&self) -> bool {
        self.transaction_reference.contains(BUNDLE_DELIMITER)
    }

    /// The committed transaction hashes, in commitment order.
    ///
    /// Hashes may be given with or without a `0x` prefix.
    pub fn transaction_hashes(&self) -> Result<SmallVec<[B256; 4]>, InvalidTransactionReference> {
        if self.transaction_reference.trim().is_empty() {
            return Err(InvalidTransactionReference::Empty);
        }
        self.transaction_reference
            .split(BUNDLE_DELIMITER)
            .map(str::trim)
            .map(|hash| {
                hash.parse::<B256>()
                    .map_err(|_| InvalidTransactionReference::InvalidHash(hash.to_owned()))
            })
            .collect()
    }
}
