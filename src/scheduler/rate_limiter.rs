//! Minimum-interval rate limiter for external API calls.
//!
//! Successive `acquire()` calls return at least `period` apart. Callers queue
//! on the inner mutex, so concurrent tasks sharing one limiter are spaced out
//! in arrival order.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces calls at least `period` apart.
pub struct RateLimiter {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter. A zero period never waits.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    /// Minimum spacing between calls.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until a call is allowed, then records it.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.period;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}
