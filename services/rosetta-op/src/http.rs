//! HTTP server adapter
//!
//! Owns the listening socket and every accepted connection. Serving and
//! shutting down are separate operations so they can run as two tasks of the
//! same group: one blocks in the accept loop, the other waits for the scope
//! and then calls [`HttpServerAdapter::shutdown`].
//!
//! ```text
//! serve()     bind ─► accept loop ──────────────► return Ok
//!                                  ▲ stop
//! shutdown()  stop ─► drain connections ─(budget)─► force close
//! ```

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

/// Maximum duration for reading a request, counted from its first byte
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum time a keep-alive connection may wait for its next request
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive accept failures tolerated before serving gives up
const MAX_ACCEPT_FAILURES: u32 = 32;
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Timeouts applied to every accepted connection.
///
/// `read` bounds the request head from its first byte and any stall while
/// the body is streamed in, `write` bounds the handler, and `idle` closes a
/// keep-alive connection that has not started a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeouts {
    pub read: Duration,
    pub write: Duration,
    pub idle: Duration,
}

impl ServerTimeouts {
    /// Fixed read and idle timeouts with the given write timeout
    pub fn with_write(write: Duration) -> Self {
        Self {
            read: READ_TIMEOUT,
            write,
            idle: IDLE_TIMEOUT,
        }
    }
}

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("unable to accept connections: {0}")]
    Accept(#[source] io::Error),

    #[error("shutdown budget of {budget:?} exceeded; forcibly closed {remaining} connection(s)")]
    DrainTimeout { budget: Duration, remaining: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenState {
    Pending,
    Bound(SocketAddr),
    Closed,
}

pub struct HttpServerAdapter {
    addr: SocketAddr,
    router: Router,
    timeouts: ServerTimeouts,
    /// Stop accepting and ask open connections to finish
    stop: CancellationToken,
    /// Drop whatever connections are still open
    force: CancellationToken,
    connections: TaskTracker,
    listen: watch::Sender<ListenState>,
}

impl HttpServerAdapter {
    pub fn new(addr: SocketAddr, router: Router, timeouts: ServerTimeouts) -> Self {
        let (listen, _) = watch::channel(ListenState::Pending);
        Self {
            addr,
            router,
            timeouts,
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
            connections: TaskTracker::new(),
            listen,
        }
    }

    /// Address the server is listening on.
    ///
    /// Waits for `serve` to bind; `None` if it never did or has since stopped.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut listen = self.listen.subscribe();
        let state = listen
            .wait_for(|state| *state != ListenState::Pending)
            .await
            .ok()?;
        match *state {
            ListenState::Bound(addr) => Some(addr),
            _ => None,
        }
    }

    /// Number of connections currently being served
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Binds and accepts connections until [`shutdown`](Self::shutdown) is called.
    pub async fn serve(&self) -> Result<(), HttpError> {
        if self.stop.is_cancelled() {
            self.listen.send_replace(ListenState::Closed);
            return Ok(());
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.listen.send_replace(ListenState::Closed);
                return Err(e);
            }
        };

        let result = self.accept_loop(&listener).await;
        drop(listener);
        self.listen.send_replace(ListenState::Closed);
        info!("Server stopped accepting connections");
        result
    }

    async fn bind(&self) -> Result<TcpListener, HttpError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| HttpError::Bind {
                addr: self.addr,
                source,
            })?;
        let local = listener.local_addr().map_err(|source| HttpError::Bind {
            addr: self.addr,
            source,
        })?;

        info!("Server listening on {}", local);
        self.listen.send_replace(ListenState::Bound(local));
        Ok(listener)
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<(), HttpError> {
        let router = self
            .router
            .clone()
            .layer(TimeoutLayer::new(self.timeouts.write))
            .layer(RequestBodyTimeoutLayer::new(self.timeouts.read));
        let builder = auto::Builder::new(TokioExecutor::new());
        let mut failures = 0u32;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(e) if is_connection_error(&e) => {
                    debug!("Dropped connection during accept: {}", e);
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_ACCEPT_FAILURES {
                        return Err(HttpError::Accept(e));
                    }
                    let backoff = accept_backoff(failures);
                    warn!("Accept error: {}; retrying in {:?}", e, backoff);
                    time::sleep(backoff).await;
                    continue;
                }
            };

            debug!("Accepted connection from {}", peer);
            self.connections.spawn(serve_connection(
                builder.clone(),
                stream,
                peer,
                router.clone(),
                self.timeouts,
                self.stop.clone(),
                self.force.clone(),
            ));
        }
    }

    /// Stops accepting, lets open connections finish within `budget`, then
    /// forcibly closes the rest. `None` waits for every connection.
    pub async fn shutdown(&self, budget: Option<Duration>) -> Result<(), HttpError> {
        info!(
            "Shutting down server ({} open connection(s))",
            self.connections.len()
        );
        self.stop.cancel();
        self.connections.close();

        let Some(budget) = budget else {
            self.connections.wait().await;
            info!("Server shut down");
            return Ok(());
        };

        match time::timeout(budget, self.connections.wait()).await {
            Ok(()) => {
                info!("Server shut down");
                Ok(())
            }
            Err(_) => {
                let remaining = self.connections.len();
                warn!(
                    "Shutdown budget of {:?} exceeded; closing {} connection(s)",
                    budget, remaining
                );
                self.force.cancel();
                self.connections.wait().await;
                Err(HttpError::DrainTimeout { budget, remaining })
            }
        }
    }
}

async fn serve_connection(
    builder: auto::Builder<TokioExecutor>,
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    timeouts: ServerTimeouts,
    stop: CancellationToken,
    force: CancellationToken,
) {
    let activity = Activity::new();
    let service = {
        let activity = activity.clone();
        hyper::service::service_fn(move |request: Request<Incoming>| {
            let router = router.clone();
            let request_guard = activity.begin();
            async move {
                let response = router.oneshot(request).await;
                drop(request_guard);
                response
            }
        })
    };

    let stream = TrackedStream {
        inner: stream,
        activity: activity.clone(),
    };
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);
    let mut closing = false;

    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection from {} ended with error: {}", peer, e);
                }
                return;
            }
            _ = stop.cancelled(), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
            expired = activity.expired(timeouts), if !closing => match expired {
                Expiry::Idle => {
                    debug!("Closing idle connection from {}", peer);
                    closing = true;
                    connection.as_mut().graceful_shutdown();
                }
                Expiry::Read => {
                    debug!("Timed out reading request from {}", peer);
                    return;
                }
            },
            _ = force.cancelled() => {
                debug!("Forcibly closing connection from {}", peer);
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActivityState {
    in_flight: usize,
    last: Instant,
    /// First byte of a request whose head has not been parsed yet
    reading_since: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Idle,
    Read,
}

/// Request activity on a single connection, used for idle and read deadlines.
#[derive(Clone)]
struct Activity {
    state: Arc<watch::Sender<ActivityState>>,
}

impl Activity {
    fn new() -> Self {
        let (state, _) = watch::channel(ActivityState {
            in_flight: 0,
            last: Instant::now(),
            reading_since: None,
        });
        Self {
            state: Arc::new(state),
        }
    }

    /// Bytes arrived on the socket; starts the read deadline of a new request.
    fn received(&self) {
        self.state.send_if_modified(|state| {
            if state.in_flight > 0 || state.reading_since.is_some() {
                return false;
            }
            state.reading_since = Some(Instant::now());
            true
        });
    }

    fn begin(&self) -> RequestGuard {
        self.state.send_modify(|state| {
            state.in_flight += 1;
            state.last = Instant::now();
            state.reading_since = None;
        });
        RequestGuard {
            activity: self.clone(),
        }
    }

    /// Completes once a partial request has been pending for `read`, or no
    /// request has been in flight for `idle`.
    async fn expired(&self, timeouts: ServerTimeouts) -> Expiry {
        let mut state = self.state.subscribe();
        loop {
            let snapshot = *state.borrow_and_update();
            if snapshot.in_flight > 0 {
                let _ = state.changed().await;
                continue;
            }
            let (deadline, expiry) = match snapshot.reading_since {
                Some(since) => (since + timeouts.read, Expiry::Read),
                None => (snapshot.last + timeouts.idle, Expiry::Idle),
            };
            tokio::select! {
                _ = time::sleep_until(deadline) => return expiry,
                _ = state.changed() => {}
            }
        }
    }
}

struct RequestGuard {
    activity: Activity,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.state.send_modify(|state| {
            state.in_flight -= 1;
            state.last = Instant::now();
        });
    }
}

/// Socket that reports incoming bytes to the connection's [`Activity`]
struct TrackedStream {
    inner: TcpStream,
    activity: Activity,
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.activity.received();
        }
        poll
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

fn accept_backoff(failures: u32) -> Duration {
    let backoff = Duration::from_millis(5) * 2u32.saturating_pow(failures.min(10) - 1);
    backoff.min(MAX_ACCEPT_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_take_write_from_config() {
        let timeouts = ServerTimeouts::with_write(Duration::from_secs(120));
        assert_eq!(timeouts.read, Duration::from_secs(5));
        assert_eq!(timeouts.write, Duration::from_secs(120));
        assert_eq!(timeouts.idle, Duration::from_secs(30));
    }

    #[test]
    fn test_accept_backoff_is_capped() {
        assert_eq!(accept_backoff(1), Duration::from_millis(5));
        assert_eq!(accept_backoff(2), Duration::from_millis(10));
        assert_eq!(accept_backoff(20), MAX_ACCEPT_BACKOFF);
    }

    fn short_timeouts() -> ServerTimeouts {
        ServerTimeouts {
            read: Duration::from_secs(1),
            write: Duration::from_secs(1),
            idle: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_for_in_flight_requests() {
        let activity = Activity::new();
        let guard = activity.begin();

        let expired = time::timeout(Duration::from_secs(60), activity.expired(short_timeouts())).await;
        assert!(expired.is_err(), "busy connection must not expire");

        drop(guard);
        let started = Instant::now();
        assert_eq!(activity.expired(short_timeouts()).await, Expiry::Idle);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_request_expires_after_read_timeout() {
        let activity = Activity::new();
        time::sleep(Duration::from_secs(5)).await;

        activity.received();
        let started = Instant::now();
        assert_eq!(activity.expired(short_timeouts()).await, Expiry::Read);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parsed_request_clears_read_deadline() {
        let activity = Activity::new();
        activity.received();
        drop(activity.begin());

        // Bytes of a request the connection already answered do not count
        let started = Instant::now();
        assert_eq!(activity.expired(short_timeouts()).await, Expiry::Idle);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
