use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// A point in time after which work should stop, that can also be cancelled early.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    at: Instant,
}

/// Why a [Deadline] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    TimedOut,
    Cancelled,
}

impl Deadline {
    /// Creates a deadline that expires after the given duration.
    pub fn after(duration: Duration) -> Self {
        Self::with_token(CancellationToken::new(), duration)
    }

    /// Creates a deadline that also fires when the given token is cancelled.
    pub fn with_token(token: CancellationToken, duration: Duration) -> Self {
        Self {
            token,
            at: Instant::now() + duration,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Resolves when the deadline is reached or cancelled.
    pub async fn expired(&self) -> Expiry {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Expiry::Cancelled,
            _ = sleep_until(self.at) => Expiry::TimedOut,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let deadline = Deadline::after(Duration::from_secs(5));

        assert!(!deadline.is_expired());
        assert_eq!(deadline.expired().await, Expiry::TimedOut);
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let token = CancellationToken::new();
        let deadline = Deadline::with_token(token.clone(), Duration::from_secs(60));

        token.cancel();

        assert!(deadline.is_expired());
        assert_eq!(deadline.expired().await, Expiry::Cancelled);
    }
}
