//! Service configuration
//!
//! All tuning is read from environment variables. Loading goes through a
//! lookup function so callers (and tests) can supply their own source.

use log::debug;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::network::{
    NetworkIdentifier, MAINNET_CHAIN_ID, MAINNET_NETWORK, TESTNET_CHAIN_ID, TESTNET_NETWORK,
};

pub const MODE_ENV: &str = "MODE";
pub const NETWORK_ENV: &str = "NETWORK";
pub const PORT_ENV: &str = "PORT";
pub const LISTEN_ADDR_ENV: &str = "LISTEN_ADDR";
pub const GETH_ENV: &str = "GETH";
pub const GETH_ARGUMENTS_ENV: &str = "GETH_ARGUMENTS";
pub const GETH_BINARY_ENV: &str = "GETH_BINARY";
pub const L2GETH_HTTP_TIMEOUT_ENV: &str = "L2GETH_HTTP_TIMEOUT";
pub const MAX_CONCURRENT_TRACES_ENV: &str = "MAX_CONCURRENT_TRACES";
pub const ENABLE_TRACE_CACHE_ENV: &str = "ENABLE_TRACE_CACHE";
pub const ENABLE_GETH_TRACER_ENV: &str = "ENABLE_GETH_TRACER";
pub const SHUTDOWN_TIMEOUT_ENV: &str = "SHUTDOWN_TIMEOUT";

/// Node URL used when no remote node is configured
pub const DEFAULT_GETH_URL: &str = "http://localhost:8545";
pub const DEFAULT_GETH_BINARY: &str = "/app/geth";
pub const DEFAULT_L2GETH_HTTP_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_CONCURRENT_TRACES: usize = 16;

const MAINNET_GETH_ARGUMENTS: &str = "--config=/app/optimism/geth.toml --gcmode=archive";
const TESTNET_GETH_ARGUMENTS: &str = "--config=/app/optimism/goerli.toml --gcmode=archive";

/// Whether the service may reach a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Online,
    Offline,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ONLINE" => Ok(Mode::Online),
            "OFFLINE" => Ok(Mode::Offline),
            other => Err(ConfigError::InvalidMode {
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub mode: Mode,
    pub network: NetworkIdentifier,
    pub chain_id: u64,
    /// Listen port for the HTTP API; 0 picks an ephemeral port
    pub port: u16,
    pub listen_addr: IpAddr,
    /// URL of the node the client talks to
    pub geth_url: String,
    /// True when `geth_url` points at a node we do not launch ourselves
    pub remote_geth: bool,
    pub geth_binary: String,
    pub geth_arguments: Vec<String>,
    /// Remote call budget, also used as the HTTP write timeout
    pub l2geth_http_timeout: Duration,
    pub max_concurrent_traces: usize,
    pub enable_trace_cache: bool,
    pub enable_geth_tracer: bool,
    /// Upper bound on draining in-flight requests during shutdown
    pub shutdown_timeout: Option<Duration>,
}

impl Configuration {
    /// Offline configuration for the given network with every optional
    /// setting at its default.
    pub fn offline(network: NetworkIdentifier, chain_id: u64, port: u16) -> Self {
        Self {
            mode: Mode::Offline,
            network,
            chain_id,
            port,
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            geth_url: DEFAULT_GETH_URL.to_string(),
            remote_geth: false,
            geth_binary: DEFAULT_GETH_BINARY.to_string(),
            geth_arguments: Vec::new(),
            l2geth_http_timeout: DEFAULT_L2GETH_HTTP_TIMEOUT,
            max_concurrent_traces: DEFAULT_MAX_CONCURRENT_TRACES,
            enable_trace_cache: false,
            enable_geth_tracer: false,
            shutdown_timeout: None,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values are treated the same as unset ones
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mode: Mode = get(MODE_ENV)
            .ok_or(ConfigError::Missing { name: MODE_ENV })?
            .parse()?;

        let network_value = get(NETWORK_ENV).ok_or(ConfigError::Missing { name: NETWORK_ENV })?;
        let (network, chain_id, default_arguments) = match network_value.as_str() {
            "MAINNET" => (
                NetworkIdentifier::new(MAINNET_NETWORK),
                MAINNET_CHAIN_ID,
                MAINNET_GETH_ARGUMENTS,
            ),
            "TESTNET" => (
                NetworkIdentifier::new(TESTNET_NETWORK),
                TESTNET_CHAIN_ID,
                TESTNET_GETH_ARGUMENTS,
            ),
            _ => {
                return Err(ConfigError::InvalidNetwork {
                    value: network_value,
                })
            }
        };

        let port_value = get(PORT_ENV).ok_or(ConfigError::Missing { name: PORT_ENV })?;
        let port = port_value
            .parse::<u16>()
            .map_err(|e| ConfigError::invalid(PORT_ENV, &port_value, e))?;

        let mut config = Self::offline(network, chain_id, port);
        config.mode = mode;
        config.geth_arguments = split_arguments(default_arguments);

        if let Some(value) = get(LISTEN_ADDR_ENV) {
            config.listen_addr = value
                .parse()
                .map_err(|e| ConfigError::invalid(LISTEN_ADDR_ENV, &value, e))?;
        }

        if let Some(url) = get(GETH_ENV) {
            config.geth_url = url;
            config.remote_geth = true;
        }

        if let Some(arguments) = get(GETH_ARGUMENTS_ENV) {
            config.geth_arguments = split_arguments(&arguments);
        }

        if let Some(binary) = get(GETH_BINARY_ENV) {
            config.geth_binary = binary;
        }

        if let Some(value) = get(L2GETH_HTTP_TIMEOUT_ENV) {
            let secs = value
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid(L2GETH_HTTP_TIMEOUT_ENV, &value, e))?;
            if secs == 0 {
                return Err(ConfigError::invalid(
                    L2GETH_HTTP_TIMEOUT_ENV,
                    value,
                    "timeout must be positive",
                ));
            }
            config.l2geth_http_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = get(MAX_CONCURRENT_TRACES_ENV) {
            let limit = value
                .parse::<usize>()
                .map_err(|e| ConfigError::invalid(MAX_CONCURRENT_TRACES_ENV, &value, e))?;
            if limit == 0 {
                return Err(ConfigError::invalid(
                    MAX_CONCURRENT_TRACES_ENV,
                    value,
                    "limit must be positive",
                ));
            }
            config.max_concurrent_traces = limit;
        }

        if let Some(value) = get(ENABLE_TRACE_CACHE_ENV) {
            config.enable_trace_cache = parse_bool(ENABLE_TRACE_CACHE_ENV, &value)?;
        }

        if let Some(value) = get(ENABLE_GETH_TRACER_ENV) {
            config.enable_geth_tracer = parse_bool(ENABLE_GETH_TRACER_ENV, &value)?;
        }

        if let Some(value) = get(SHUTDOWN_TIMEOUT_ENV) {
            let secs = value
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid(SHUTDOWN_TIMEOUT_ENV, &value, e))?;
            config.shutdown_timeout = Some(Duration::from_secs(secs));
        }

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn is_online(&self) -> bool {
        self.mode == Mode::Online
    }
}

fn split_arguments(arguments: &str) -> Vec<String> {
    arguments.split_whitespace().map(str::to_string).collect()
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ConfigError::invalid(name, value, "expected a boolean")),
    }
}
