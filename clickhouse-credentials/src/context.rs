//! Per-request cancellation and deadline.
//!
//! Every database call a lifecycle operation makes goes through
//! [`RequestContext::run`], so a fired cancellation token or an expired
//! deadline interrupts the in-flight call. The manager then rolls back any
//! open transaction before returning.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PluginError, PluginResult};

/// Cancellation signal and optional deadline supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Attach an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fail every call that has not finished `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    /// The cancellation token threaded through this request.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check the signal without awaiting anything.
    pub fn check(&self) -> PluginResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PluginError::DeadlineExceeded(timeout));
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the request is cancelled or its
    /// deadline passes first. An interrupted future is dropped.
    pub async fn run<F, T>(&self, fut: F) -> PluginResult<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        match self.deadline {
            Some((deadline, timeout)) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(PluginError::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(PluginError::DeadlineExceeded(timeout)),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(PluginError::Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}
