//! Optimism node client
//!
//! A cheaply cloneable handle over a JSON-RPC HTTP connection. Handlers share
//! clones; the supervisor owns the lifecycle and closes it exactly once
//! through a [`CloseGuard`] taken at construction.

use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

/// Number of block traces kept when the trace cache is enabled
pub const TRACE_CACHE_SIZE: usize = 20;

/// JavaScript tracer used when the native call tracer is disabled
const LEGACY_TRACER: &str = "{data: [], fault: function(log) {}, step: function(log) { \
    if (log.op.toString() == 'CALL') this.data.push(log.stack.peek(0)); }, \
    result: function() { return this.data; }}";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid node url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("node request {method} failed: {reason}")]
    Rpc { method: &'static str, reason: String },

    #[error("unable to decode {field}: {value}")]
    Decode { field: &'static str, value: String },

    #[error("client is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub http_timeout: Duration,
    pub max_trace_concurrency: usize,
    pub enable_trace_cache: bool,
    pub enable_geth_tracer: bool,
    pub supported_tokens: HashMap<String, bool>,
}

/// Block number, hash and timestamp (milliseconds)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    pub timestamp_ms: u64,
}

#[derive(Deserialize)]
struct RpcBlock {
    number: String,
    hash: String,
    timestamp: String,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    rpc: HttpClient,
    options: ClientOptions,
    traces: Semaphore,
    trace_cache: Option<Mutex<TraceCache>>,
    closed: AtomicBool,
}

impl Client {
    pub fn new(url: &str, chain_id: u64, options: ClientOptions) -> Result<Self, ClientError> {
        let rpc = HttpClientBuilder::default()
            .request_timeout(options.http_timeout)
            .build(url)
            .map_err(|e| ClientError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let trace_cache = options
            .enable_trace_cache
            .then(|| Mutex::new(TraceCache::new(TRACE_CACHE_SIZE)));

        info!(
            "Client for {} ready (chain {}, {} concurrent traces, trace cache {})",
            url,
            chain_id,
            options.max_trace_concurrency,
            if trace_cache.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                rpc,
                traces: Semaphore::new(options.max_trace_concurrency),
                trace_cache,
                options,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn is_supported_token(&self, address: &str) -> bool {
        self.inner
            .options
            .supported_tokens
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(false)
    }

    /// Latest block known to the node
    pub async fn current_block(&self) -> Result<BlockHeader, ClientError> {
        self.block_by_number("latest").await
    }

    pub async fn genesis_block(&self) -> Result<BlockHeader, ClientError> {
        self.block_by_number("0x0").await
    }

    async fn block_by_number(&self, tag: &str) -> Result<BlockHeader, ClientError> {
        self.ensure_open()?;
        let block: RpcBlock = self
            .inner
            .rpc
            .request("eth_getBlockByNumber", rpc_params![tag, false])
            .await
            .map_err(|e| ClientError::Rpc {
                method: "eth_getBlockByNumber",
                reason: e.to_string(),
            })?;

        Ok(BlockHeader {
            number: parse_quantity("number", &block.number)?,
            hash: block.hash,
            timestamp_ms: parse_quantity("timestamp", &block.timestamp)? * 1000,
        })
    }

    /// Call trace of every transaction in a block.
    ///
    /// At most `max_trace_concurrency` traces run at once; results are reused
    /// from the cache when it is enabled.
    pub async fn trace_block(&self, block_hash: &str) -> Result<Arc<Value>, ClientError> {
        self.ensure_open()?;

        if let Some(cache) = &self.inner.trace_cache {
            if let Some(trace) = cache.lock().await.get(block_hash) {
                debug!("Trace cache hit for {}", block_hash);
                return Ok(trace);
            }
        }

        // Fails once the client is closed
        let _permit = self
            .inner
            .traces
            .acquire()
            .await
            .map_err(|_| ClientError::Closed)?;

        let trace: Value = self
            .inner
            .rpc
            .request(
                "debug_traceBlockByHash",
                rpc_params![block_hash, self.tracer_config()],
            )
            .await
            .map_err(|e| ClientError::Rpc {
                method: "debug_traceBlockByHash",
                reason: e.to_string(),
            })?;
        let trace = Arc::new(trace);

        if let Some(cache) = &self.inner.trace_cache {
            cache.lock().await.insert(block_hash.to_string(), trace.clone());
        }

        Ok(trace)
    }

    fn tracer_config(&self) -> Value {
        let timeout = format!("{}s", self.inner.options.http_timeout.as_secs());
        if self.inner.options.enable_geth_tracer {
            json!({ "tracer": "callTracer", "timeout": timeout })
        } else {
            json!({ "tracer": LEGACY_TRACER, "timeout": timeout })
        }
    }

    /// Releases the client. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.traces.close();
        info!("Client for {} closed", self.inner.url);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Guard that closes the client when dropped.
    pub fn close_on_drop(&self) -> CloseGuard {
        CloseGuard {
            client: self.clone(),
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

pub struct CloseGuard {
    client: Client,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Insertion-ordered, bounded map of block traces.
struct TraceCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Arc<Value>>,
}

impl TraceCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: Arc<Value>) {
        if self.entries.insert(key.clone(), value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn parse_quantity(field: &'static str, value: &str) -> Result<u64, ClientError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|_| ClientError::Decode {
        field,
        value: value.to_string(),
    })
}
