//! Monotonic time and cancellation/deadline propagation (L1).
//!
//! Expiry and rate-window math always uses [`tokio::time::Instant`], never
//! wall-clock time, so NTP adjustments cannot shrink or extend a TTL window.
//! `Deadline` and `tokio_util::sync::CancellationToken` are threaded from
//! every public operation entry point down through each awaited call.

use std::time::Duration;
use tokio::time::Instant;

pub use tokio_util::sync::CancellationToken;

/// A point in monotonic time by which an operation must complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    /// Time remaining until the deadline, or `Duration::ZERO` if already past.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn as_instant(&self) -> Instant {
        self.0
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

/// The context threaded through every operation and every downstream
/// await point: a deadline and a cancellation token. Cancelling the token
/// aborts in-flight HTTP requests and stops a batch from starting new items.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Deadline,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(timeout: Duration) -> Self {
        Context {
            deadline: Deadline::after(timeout),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(deadline: Deadline) -> Self {
        Context {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A child context that inherits the same cancellation token but with a
    /// caller-supplied timeout bounded by the parent's remaining deadline.
    pub fn child(&self, timeout: Duration) -> Self {
        let child_deadline = Deadline::after(timeout).min(self.deadline);
        Context {
            deadline: child_deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Race a future against this context's deadline and cancellation token.
    /// Returns `Err(Error::Cancelled)` on cancellation, `Err(Error::Timeout)`
    /// on deadline expiry.
    pub async fn run<F, T>(&self, host: &str, fut: F) -> crate::error::Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(crate::error::Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(crate::error::Error::Cancelled),
            _ = tokio::time::sleep_until(self.deadline.as_instant()) => {
                Err(crate::error::Error::Timeout { host: host.to_string() })
            }
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_after_is_in_the_future() {
        let d = Deadline::after(Duration::from_secs(1));
        assert!(!d.is_expired());
        assert!(d.remaining() <= Duration::from_secs(1));
    }

    #[test]
    fn min_picks_the_earlier_deadline() {
        let a = Deadline::after(Duration::from_secs(10));
        let b = Deadline::after(Duration::from_millis(1));
        let earlier = a.min(b);
        assert!(earlier.remaining() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn context_cancel_short_circuits_run() {
        let ctx = Context::new(Duration::from_secs(5));
        ctx.cancel();
        let result = ctx
            .run("example.test", async { 1u8 })
            .await;
        assert!(matches!(result, Err(crate::error::Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn context_timeout_fires_before_pending_future() {
        let ctx = Context::new(Duration::from_millis(10));
        let result = ctx
            .run("example.test", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                1u8
            })
            .await;
        assert!(matches!(result, Err(crate::error::Error::Timeout { .. })));
    }
}
