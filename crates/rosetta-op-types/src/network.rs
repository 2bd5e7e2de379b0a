use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain name reported in every network identifier
pub const BLOCKCHAIN: &str = "Optimism";

/// Production network name
pub const MAINNET_NETWORK: &str = "Mainnet";

/// Test network name (Goerli)
pub const TESTNET_NETWORK: &str = "Goerli";

pub const MAINNET_CHAIN_ID: u64 = 10;
pub const TESTNET_CHAIN_ID: u64 = 420;

/// Identifies the blockchain/network pair a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkIdentifier {
    pub blockchain: String,
    pub network: String,
}

impl NetworkIdentifier {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            blockchain: BLOCKCHAIN.to_string(),
            network: network.into(),
        }
    }

    pub fn mainnet() -> Self {
        Self::new(MAINNET_NETWORK)
    }

    pub fn testnet() -> Self {
        Self::new(TESTNET_NETWORK)
    }
}

impl fmt::Display for NetworkIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.blockchain, self.network)
    }
}
