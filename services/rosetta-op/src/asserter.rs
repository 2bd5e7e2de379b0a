//! Request asserter
//!
//! Rejects requests addressed to a network this instance does not serve.
//! Construction checks the declared operation types and networks once, so a
//! misconfigured service fails before it starts listening.

use std::collections::HashSet;
use thiserror::Error;

use rosetta_op_types::NetworkIdentifier;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsserterError {
    #[error("no operation types declared")]
    NoOperationTypes,

    #[error("operation type {0} is declared more than once")]
    DuplicateOperationType(String),

    #[error("operation type must not be empty")]
    EmptyOperationType,

    #[error("no supported networks declared")]
    NoNetworks,

    #[error("network identifier {0} has an empty field")]
    IncompleteNetwork(NetworkIdentifier),

    #[error("network identifier {0} is declared more than once")]
    DuplicateNetwork(NetworkIdentifier),

    #[error("network identifier {0} is not supported")]
    UnsupportedNetwork(NetworkIdentifier),
}

#[derive(Debug, Clone)]
pub struct Asserter {
    operation_types: Vec<String>,
    networks: Vec<NetworkIdentifier>,
    call_methods: Vec<String>,
    historical_balance_supported: bool,
    include_mempool_coins: bool,
}

impl Asserter {
    pub fn new(
        operation_types: &[&str],
        historical_balance_supported: bool,
        networks: Vec<NetworkIdentifier>,
        call_methods: &[&str],
        include_mempool_coins: bool,
    ) -> Result<Self, AsserterError> {
        if operation_types.is_empty() {
            return Err(AsserterError::NoOperationTypes);
        }

        let mut seen = HashSet::new();
        for operation in operation_types {
            if operation.is_empty() {
                return Err(AsserterError::EmptyOperationType);
            }
            if !seen.insert(*operation) {
                return Err(AsserterError::DuplicateOperationType(operation.to_string()));
            }
        }

        if networks.is_empty() {
            return Err(AsserterError::NoNetworks);
        }

        let mut seen = HashSet::new();
        for network in &networks {
            if network.blockchain.is_empty() || network.network.is_empty() {
                return Err(AsserterError::IncompleteNetwork(network.clone()));
            }
            if !seen.insert(network) {
                return Err(AsserterError::DuplicateNetwork(network.clone()));
            }
        }

        Ok(Self {
            operation_types: operation_types.iter().map(|s| s.to_string()).collect(),
            networks,
            call_methods: call_methods.iter().map(|s| s.to_string()).collect(),
            historical_balance_supported,
            include_mempool_coins,
        })
    }

    pub fn validate_network(&self, network: &NetworkIdentifier) -> Result<(), AsserterError> {
        if self.networks.contains(network) {
            Ok(())
        } else {
            Err(AsserterError::UnsupportedNetwork(network.clone()))
        }
    }

    pub fn networks(&self) -> &[NetworkIdentifier] {
        &self.networks
    }

    pub fn operation_types(&self) -> &[String] {
        &self.operation_types
    }

    pub fn call_methods(&self) -> &[String] {
        &self.call_methods
    }

    pub fn historical_balance_supported(&self) -> bool {
        self.historical_balance_supported
    }

    pub fn include_mempool_coins(&self) -> bool {
        self.include_mempool_coins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosetta_op_types::{CALL_METHODS, OPERATION_TYPES};

    fn asserter_for(networks: Vec<NetworkIdentifier>) -> Result<Asserter, AsserterError> {
        Asserter::new(&OPERATION_TYPES, true, networks, &CALL_METHODS, false)
    }

    #[test]
    fn test_validates_configured_network() {
        let asserter = asserter_for(vec![NetworkIdentifier::mainnet()]).unwrap();

        assert!(asserter.validate_network(&NetworkIdentifier::mainnet()).is_ok());
        assert_eq!(
            asserter.validate_network(&NetworkIdentifier::testnet()),
            Err(AsserterError::UnsupportedNetwork(NetworkIdentifier::testnet()))
        );
        assert_eq!(asserter.operation_types().len(), OPERATION_TYPES.len());
        assert!(asserter.historical_balance_supported());
        assert!(!asserter.include_mempool_coins());
    }

    #[test]
    fn test_rejects_bad_declarations() {
        assert_eq!(asserter_for(vec![]).unwrap_err(), AsserterError::NoNetworks);

        let incomplete = NetworkIdentifier::new("");
        assert_eq!(
            asserter_for(vec![incomplete.clone()]).unwrap_err(),
            AsserterError::IncompleteNetwork(incomplete)
        );

        assert_eq!(
            asserter_for(vec![NetworkIdentifier::mainnet(), NetworkIdentifier::mainnet()]).unwrap_err(),
            AsserterError::DuplicateNetwork(NetworkIdentifier::mainnet())
        );

        assert_eq!(
            Asserter::new(&[], true, vec![NetworkIdentifier::mainnet()], &[], false).unwrap_err(),
            AsserterError::NoOperationTypes
        );

        assert_eq!(
            Asserter::new(&["CALL", "CALL"], true, vec![NetworkIdentifier::mainnet()], &[], false)
                .unwrap_err(),
            AsserterError::DuplicateOperationType("CALL".to_string())
        );
    }
}
