pub mod config;
pub mod error;
pub mod network;
pub mod operations;
pub mod tokens;

// Re-export the main types for convenience
pub use config::{Configuration, Mode};
pub use error::ConfigError;
pub use network::{
    NetworkIdentifier,
    BLOCKCHAIN,
    MAINNET_NETWORK,
    TESTNET_NETWORK,
    MAINNET_CHAIN_ID,
    TESTNET_CHAIN_ID,
};
pub use operations::{
    OPERATION_TYPES,
    CALL_METHODS,
    HISTORICAL_BALANCE_SUPPORTED,
    INCLUDE_MEMPOOL_COINS,
};
pub use tokens::{supported_tokens, OP_TOKEN_ADDRESS};
