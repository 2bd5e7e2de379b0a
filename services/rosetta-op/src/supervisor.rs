//! # Service supervisor
//!
//! Starts every subsystem of a run under one cancellation scope and decides
//! how the run ends.
//!
//! ```text
//! Init ──► Starting ──► Running ──► ShuttingDown ──► Terminated
//!  │          │            │             │
//!  asserter   node task    join()        client closed
//!             client
//!             serve/shutdown tasks
//! ```
//!
//! ## Rules
//! - Construction errors (asserter, client) abort before any task starts
//! - Any task error cancels the scope; the other tasks wind down
//! - The client is closed exactly once, after join, on every exit path
//! - A received signal turns the outcome into [`SupervisorError::Halted`],
//!   even if a task also failed

use log::{debug, info};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rosetta_op_runtime::{CancellationScope, SignalSource, SignalWatcher, TaskGroup};
use rosetta_op_types::{
    supported_tokens, Configuration, CALL_METHODS, HISTORICAL_BALANCE_SUPPORTED,
    INCLUDE_MEMPOOL_COINS, OPERATION_TYPES,
};

use crate::asserter::Asserter;
use crate::client::{Client, ClientOptions};
use crate::error::{SupervisorError, SupervisorResult};
use crate::http::{HttpServerAdapter, ServerTimeouts};
use crate::node::NodeLauncher;
use crate::routes::{self, ApiState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Init,
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Init => "init",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::ShuttingDown => "shutting_down",
            SupervisorState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

type Registration = Box<dyn FnOnce(&mut TaskGroup) + Send>;
type ListenCallback = Box<dyn FnOnce(SocketAddr) + Send>;

pub struct Supervisor<S> {
    config: Configuration,
    signals: S,
    extra_tasks: Vec<Registration>,
    on_listening: Option<ListenCallback>,
}

impl<S: SignalSource> Supervisor<S> {
    pub fn new(config: Configuration, signals: S) -> Self {
        Self {
            config,
            signals,
            extra_tasks: Vec::new(),
            on_listening: None,
        }
    }

    /// Adds a task that runs alongside the built-in ones under the same scope.
    pub fn with_task<F, Fut>(mut self, name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(CancellationScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        self.extra_tasks
            .push(Box::new(move |group: &mut TaskGroup| group.register(name, task)));
        self
    }

    /// Called with the bound address once the HTTP server listens.
    pub fn on_listening<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(SocketAddr) + Send + 'static,
    {
        self.on_listening = Some(Box::new(callback));
        self
    }

    pub async fn run(self) -> SupervisorResult<()> {
        let Supervisor {
            config,
            signals,
            extra_tasks,
            on_listening,
        } = self;
        let mut state = SupervisorState::Init;

        // The asserter rejects incorrectly formatted requests
        let asserter = Asserter::new(
            &OPERATION_TYPES,
            HISTORICAL_BALANCE_SUPPORTED,
            vec![config.network.clone()],
            &CALL_METHODS,
            INCLUDE_MEMPOOL_COINS,
        )?;

        transition(&mut state, SupervisorState::Starting);
        let root = CancellationScope::new();
        let watcher = SignalWatcher::new(signals)
            .on_signal({
                let root = root.clone();
                move || root.cancel()
            })
            .spawn();

        let mut group = TaskGroup::new(&root);

        let mut client = None;
        if config.is_online() {
            if !config.remote_geth {
                let launcher = NodeLauncher::from_config(&config);
                group.register("geth", move |scope| async move {
                    launcher.run(scope).await?;
                    Ok(())
                });
            }

            let options = ClientOptions {
                http_timeout: config.l2geth_http_timeout,
                max_trace_concurrency: config.max_concurrent_traces,
                enable_trace_cache: config.enable_trace_cache,
                enable_geth_tracer: config.enable_geth_tracer,
                supported_tokens: supported_tokens(&config.network.network),
            };
            client = Some(Client::new(&config.geth_url, config.chain_id, options)?);
        }
        // Released after join whichever way the run ends
        let close_guard = client.as_ref().map(Client::close_on_drop);

        let addr = SocketAddr::new(config.listen_addr, config.port);
        let timeouts = ServerTimeouts::with_write(config.l2geth_http_timeout);
        let shutdown_timeout = config.shutdown_timeout;
        let network = config.network.clone();
        let router = routes::router(ApiState::new(Arc::new(config), client, Arc::new(asserter)));
        let adapter = Arc::new(HttpServerAdapter::new(addr, router, timeouts));

        {
            let adapter = adapter.clone();
            group.register("serve", move |_scope| async move {
                let notify = async {
                    if let Some(callback) = on_listening {
                        if let Some(addr) = adapter.local_addr().await {
                            callback(addr);
                        }
                    }
                };
                let (served, ()) = tokio::join!(adapter.serve(), notify);
                served?;
                Ok(())
            });
        }

        {
            let adapter = adapter.clone();
            group.register("shutdown", move |scope| async move {
                // The server has no notion of the scope, so translate it here
                scope.cancelled().await;
                adapter
                    .shutdown(drain_budget(scope.remaining(), shutdown_timeout))
                    .await?;
                Ok(())
            });
        }

        for register in extra_tasks {
            register(&mut group);
        }

        transition(&mut state, SupervisorState::Running);
        info!("Running {} tasks for {}", group.len(), network);
        let joined = group.run().join().await;

        transition(&mut state, SupervisorState::ShuttingDown);
        drop(close_guard);

        transition(&mut state, SupervisorState::Terminated);
        if watcher.signal_received() {
            return Err(SupervisorError::Halted);
        }
        joined.map_err(SupervisorError::from)
    }
}

fn transition(state: &mut SupervisorState, next: SupervisorState) {
    debug!("Supervisor {} -> {}", state, next);
    *state = next;
}

/// Time allowed for draining connections: the scope's remaining deadline,
/// capped by the configured shutdown timeout.
fn drain_budget(remaining: Option<Duration>, shutdown_timeout: Option<Duration>) -> Option<Duration> {
    match (remaining, shutdown_timeout) {
        (Some(remaining), Some(timeout)) => Some(remaining.min(timeout)),
        (remaining, timeout) => remaining.or(timeout),
    }
}
