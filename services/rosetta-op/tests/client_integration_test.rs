//! Client behaviour against an in-process JSON-RPC node

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::types::error::ErrorObject;
use serde_json::{json, Value};

use rosetta_op::{Client, ClientError, ClientOptions};
use rosetta_op_types::{supported_tokens, TESTNET_NETWORK};

#[rpc(server)]
pub trait MockNodeApi {
    #[method(name = "eth_getBlockByNumber")]
    async fn block_by_number(&self, tag: String, full: bool) -> Result<Value, ErrorObject<'static>>;

    #[method(name = "debug_traceBlockByHash")]
    async fn trace_block(&self, hash: String, config: Value) -> Result<Value, ErrorObject<'static>>;
}

#[derive(Clone, Default)]
struct MockNode {
    trace_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl MockNodeApiServer for MockNode {
    async fn block_by_number(&self, tag: String, _full: bool) -> Result<Value, ErrorObject<'static>> {
        let (number, timestamp) = if tag == "0x0" { ("0x0", "0x5e9ad5a0") } else { ("0x1f4", "0x64000000") };
        Ok(json!({
            "number": number,
            "hash": format!("0x{:0>64}", number.trim_start_matches("0x")),
            "timestamp": timestamp,
        }))
    }

    async fn trace_block(&self, hash: String, config: Value) -> Result<Value, ErrorObject<'static>> {
        self.trace_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "block": hash, "tracer": config["tracer"] }))
    }
}

async fn start_node(node: MockNode) -> (SocketAddr, ServerHandle) {
    let server = ServerBuilder::default().build("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start(node.into_rpc());
    (addr, handle)
}

fn options(max_trace_concurrency: usize, enable_trace_cache: bool) -> ClientOptions {
    ClientOptions {
        http_timeout: Duration::from_secs(5),
        max_trace_concurrency,
        enable_trace_cache,
        enable_geth_tracer: true,
        supported_tokens: supported_tokens(TESTNET_NETWORK),
    }
}

#[tokio::test]
async fn test_reads_current_and_genesis_blocks() {
    let (addr, _handle) = start_node(MockNode::default()).await;
    let client = Client::new(&format!("http://{}", addr), 420, options(2, false)).unwrap();

    let current = client.current_block().await.unwrap();
    assert_eq!(current.number, 500);
    assert_eq!(current.timestamp_ms, 0x64000000 * 1000);

    let genesis = client.genesis_block().await.unwrap();
    assert_eq!(genesis.number, 0);
    assert!(genesis.hash.starts_with("0x"));
}

#[tokio::test]
async fn test_trace_concurrency_is_bounded() {
    let node = MockNode::default();
    let (addr, _handle) = start_node(node.clone()).await;
    let client = Client::new(&format!("http://{}", addr), 420, options(2, false)).unwrap();

    let traces: Vec<_> = (0..6)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.trace_block(&format!("0x{:x}", i)).await })
        })
        .collect();
    for trace in traces {
        let trace = trace.await.unwrap().unwrap();
        assert_eq!(trace["tracer"], "callTracer");
    }

    assert_eq!(node.trace_calls.load(Ordering::SeqCst), 6);
    assert!(node.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_trace_cache_avoids_repeat_calls() {
    let node = MockNode::default();
    let (addr, _handle) = start_node(node.clone()).await;
    let client = Client::new(&format!("http://{}", addr), 420, options(4, true)).unwrap();

    let first = client.trace_block("0xabc").await.unwrap();
    let second = client.trace_block("0xabc").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(node.trace_calls.load(Ordering::SeqCst), 1);

    client.trace_block("0xdef").await.unwrap();
    assert_eq!(node.trace_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_node_is_an_rpc_error() {
    let client = Client::new("http://127.0.0.1:1", 420, options(1, false)).unwrap();
    let result = client.current_block().await;
    assert!(
        matches!(result, Err(ClientError::Rpc { method: "eth_getBlockByNumber", .. })),
        "{:?}",
        result
    );
}
