//! Token allow-lists
//!
//! Each network carries a fixed set of ERC-20 contract addresses the client is
//! allowed to report balances for. Unknown networks fall back to the native
//! OP token only.

use std::collections::HashMap;

use crate::network::{MAINNET_NETWORK, TESTNET_NETWORK};

/// Predeployed OP token, present on every network
pub const OP_TOKEN_ADDRESS: &str = "0x4200000000000000000000000000000000000042";

const MAINNET_TOKENS: [&str; 6] = [
    OP_TOKEN_ADDRESS,
    "0xda10009cbd5d07dd0cecc66161fc93d7c9000da1", // DAI
    "0x8700daec35af8ff88c16bdf0418774cb3d7599b4", // SNX
    "0x94b008aa00579c1307b0ef2c499ad98a8ce58e58", // USDT
    "0x68f180fcce6836688e9084f035309e29bf0a2095", // WBTC
    "0x7f5c764cbc14f9669b88837ca1490cca17c31607", // USDC
];

const TESTNET_TOKENS: [&str; 6] = [
    OP_TOKEN_ADDRESS,
    "0xda10009cbd5d07dd0cecc66161fc93d7c9000da1", // DAI
    "0x2e5ed97596a8368eb9e44b1f3f25b2e813845303", // SNX
    "0x853eb4ba5d0ba2b77a0a5329fd2110d5ce149ece", // USDT
    "0xe0a592353e81a94db6e3226fd4a99f881751776a", // WBTC
    "0x7e07e15d2a87a24492740d16f5bdf58c16db0c4e", // USDC
];

/// Resolve the supported-token table for a network name.
///
/// The map is keyed by lowercase contract address; every value is `true`.
pub fn supported_tokens(network: &str) -> HashMap<String, bool> {
    let addresses: &[&str] = match network {
        MAINNET_NETWORK => &MAINNET_TOKENS,
        TESTNET_NETWORK => &TESTNET_TOKENS,
        _ => &[OP_TOKEN_ADDRESS],
    };

    addresses
        .iter()
        .map(|address| (address.to_string(), true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_tokens() {
        let tokens = supported_tokens(MAINNET_NETWORK);
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens.get(OP_TOKEN_ADDRESS), Some(&true));
        assert!(tokens.contains_key("0x7f5c764cbc14f9669b88837ca1490cca17c31607"));
    }

    #[test]
    fn test_testnet_tokens() {
        let tokens = supported_tokens(TESTNET_NETWORK);
        assert_eq!(tokens.len(), 6);
        assert!(tokens.contains_key(OP_TOKEN_ADDRESS));
        assert!(tokens.contains_key("0x7e07e15d2a87a24492740d16f5bdf58c16db0c4e"));
        // Mainnet USDC is not on the testnet list
        assert!(!tokens.contains_key("0x7f5c764cbc14f9669b88837ca1490cca17c31607"));
    }

    #[test]
    fn test_unknown_network_falls_back_to_op() {
        let tokens = supported_tokens("Sepolia");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens.get(OP_TOKEN_ADDRESS), Some(&true));
    }

    #[test]
    fn test_all_addresses_are_lowercase() {
        for network in [MAINNET_NETWORK, TESTNET_NETWORK, "other"] {
            for address in supported_tokens(network).keys() {
                assert_eq!(address, &address.to_lowercase());
            }
        }
    }
}
