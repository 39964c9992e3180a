//! Shared cancellation signal with a wall-clock expiry.
//!
//! One [`DeadlineContext`] is created per retry sequence and handed to every
//! pass. Workers check it before touching an item and race their stage
//! operation against [`DeadlineContext::done`].

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Expiry used when the requested timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct DeadlineContext {
    token: CancellationToken,
    expires_at: Instant,
}

/// Why a context stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    DeadlineExceeded,
    Cancelled,
}

impl DeadlineContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            token: CancellationToken::new(),
            expires_at,
        }
    }

    /// Cancel explicitly, before the deadline.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.reason().is_some()
    }

    /// `None` while live.
    pub fn reason(&self) -> Option<DoneReason> {
        if Instant::now() >= self.expires_at {
            Some(DoneReason::DeadlineExceeded)
        } else if self.token.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else {
            None
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Resolves once the deadline elapses or the context is cancelled.
    pub async fn done(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = sleep_until(self.expires_at) => {}
        }
    }
}
