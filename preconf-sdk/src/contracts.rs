//! Contract bindings for the settlement chain.
//!
//! - `IBlockTracker` announces L1 winners and settlement windows, and maps builder
//!   names to their on-chain identity.
//! - `IPreconfStore` holds the commitments made by builders.
//! - `IOracle` is the entry point the oracle calls to reward or slash a commitment.

use alloy::sol;

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface IBlockTracker {
        /// Emitted once the winner of an L1 block has been recorded.
        event NewL1Block(uint256 indexed blockNumber, string winner, uint256 indexed window);

        /// Emitted when a new settlement window opens.
        event NewWindow(uint256 indexed window);

        function getBuilder(string calldata builderName) external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface IPreconfStore {
        struct PreConfCommitment {
            bool commitmentUsed;
            address bidder;
            address commiter;
            uint64 bid;
            uint64 blockNumber;
            bytes32 bidHash;
            uint64 decayStartTimeStamp;
            uint64 decayEndTimeStamp;
            string txnHash;
            bytes32 commitmentHash;
            bytes bidSignature;
            bytes commitmentSignature;
            uint64 dispatchTimestamp;
        }

        function getCommitmentsByBlockNumber(uint256 blockNumber) external view returns (bytes32[] memory);

        function getCommitment(bytes32 commitmentIdx) external view returns (PreConfCommitment memory);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface IOracle {
        function processBuilderCommitmentForBlockNumber(
            bytes32 commitmentIdx,
            uint256 blockNumber,
            string calldata builder,
            bool isSlash,
            uint256 residualBidPercentAfterDecay
        ) external;
    }
}
