//! # Termination signal handling
//!
//! [`SignalWatcher`] waits for the first termination signal from a
//! [`SignalSource`], raises a [`SignalFlag`] and runs its callbacks exactly
//! once. It lives outside any task group so a signal is still caught while
//! the group is already tearing down. Later signals are logged and ignored.
//!
//! ## Unix
//! [`OsSignals`] listens for **SIGINT**, **SIGTERM** and **SIGQUIT**.
//!
//! ## Other platforms
//! Only Ctrl-C is observed.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A stream of termination signals.
#[async_trait]
pub trait SignalSource: Send + 'static {
    /// Waits for the next signal and returns its name, or `None` once the
    /// source can no longer deliver signals.
    async fn recv(&mut self) -> Option<&'static str>;
}

/// Operating-system termination signals.
pub struct OsSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigquit: tokio::signal::unix::Signal,
}

impl OsSignals {
    /// Installs the signal listeners. Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            received = self.sigint.recv() => received.map(|_| "SIGINT"),
            received = self.sigterm.recv() => received.map(|_| "SIGTERM"),
            received = self.sigquit.recv() => received.map(|_| "SIGQUIT"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|_| "CTRL-C")
    }
}

/// Channel-fed signals, used to drive shutdown without touching the process.
#[async_trait]
impl SignalSource for mpsc::Receiver<&'static str> {
    async fn recv(&mut self) -> Option<&'static str> {
        mpsc::Receiver::recv(self).await
    }
}

/// Records whether a termination signal was received.
///
/// Starts lowered and can only ever be raised.
#[derive(Debug, Clone, Default)]
pub struct SignalFlag(Arc<AtomicBool>);

impl SignalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag; returns `true` only for the call that raised it.
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Callback = Box<dyn FnOnce() + Send>;

pub struct SignalWatcher<S> {
    source: S,
    flag: SignalFlag,
    callbacks: Vec<Callback>,
}

impl<S: SignalSource> SignalWatcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            flag: SignalFlag::new(),
            callbacks: Vec::new(),
        }
    }

    /// Adds a callback to run when the first signal arrives.
    pub fn on_signal<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn flag(&self) -> SignalFlag {
        self.flag.clone()
    }

    /// Starts watching on a dedicated tokio task.
    pub fn spawn(self) -> WatcherHandle {
        let flag = self.flag.clone();
        let task = tokio::spawn(self.watch());
        WatcherHandle { flag, task }
    }

    async fn watch(mut self) {
        let Some(signal) = self.source.recv().await else {
            debug!("Signal source closed before any signal arrived");
            return;
        };

        info!("Received {}, shutting down", signal);
        // The flag is raised before any callback runs so it is already set
        // by the time cancelled tasks return.
        self.flag.raise();
        for callback in self.callbacks.drain(..) {
            callback();
        }

        while let Some(signal) = self.source.recv().await {
            warn!("Received {} while already shutting down; ignoring", signal);
        }
    }
}

/// Owner of a running [`SignalWatcher`]. Dropping it stops the watcher.
pub struct WatcherHandle {
    flag: SignalFlag,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Whether a termination signal has been received so far.
    pub fn signal_received(&self) -> bool {
        self.flag.is_raised()
    }

    pub fn flag(&self) -> SignalFlag {
        self.flag.clone()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::scope::CancellationScope;

    #[test]
    fn test_flag_raises_once() {
        let flag = SignalFlag::new();
        assert!(!flag.is_raised());
        assert!(flag.raise());
        assert!(!flag.raise());
        assert!(flag.is_raised());
        assert!(flag.clone().is_raised());
    }

    #[tokio::test]
    async fn test_first_signal_cancels_and_raises_flag() {
        let (tx, rx) = mpsc::channel(4);
        let scope = CancellationScope::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = SignalWatcher::new(rx)
            .on_signal({
                let scope = scope.clone();
                move || scope.cancel()
            })
            .on_signal({
                let calls = calls.clone();
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
            .spawn();
        assert!(!handle.signal_received());

        tx.send("SIGTERM").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), scope.cancelled())
            .await
            .expect("signal should cancel the scope");
        assert!(handle.signal_received());

        // A second signal changes nothing
        tx.send("SIGINT").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.signal_received());
    }

    #[tokio::test]
    async fn test_closed_source_never_raises() {
        let (tx, rx) = mpsc::channel::<&'static str>(1);
        let scope = CancellationScope::new();
        let watcher = SignalWatcher::new(rx).on_signal({
            let scope = scope.clone();
            move || scope.cancel()
        });
        let flag = watcher.flag();
        let _handle = watcher.spawn();

        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!flag.is_raised());
        assert!(!scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_watcher() {
        let (tx, rx) = mpsc::channel(1);
        let watcher = SignalWatcher::new(rx);
        let flag = watcher.flag();
        drop(watcher.spawn());

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Receiver is gone together with the aborted task
        assert!(tx.send("SIGTERM").await.is_err());
        assert!(!flag.is_raised());
    }
}
