//! Cancellation scopes
//!
//! A thin layer over [`CancellationToken`] that can also carry a deadline.
//! Once cancelled (explicitly or by its deadline passing) a scope stays
//! cancelled. Child scopes observe their parent's cancellation and inherit
//! its deadline, but cancelling a child never reaches the parent.

use log::debug;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CancellationScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancellationScope {
    /// Root scope without a deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Root scope that cancels itself once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Request cancellation. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("Cancellation requested");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline_passed()
    }

    /// Completes once the scope is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when the scope has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn deadline_passed(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}
