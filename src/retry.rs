//! Fixed-count retry with doubling delay.

use std::thread::sleep;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Attempts in total, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Backoff {
    pub fn new(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Run `op` until it succeeds or the attempts run out; the last error is returned.
pub fn with_backoff<T, F>(backoff: Backoff, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut retry = 0u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if retry + 1 >= backoff.attempts => return Err(e),
            Err(e) => {
                let wait = backoff.delay(retry);
                warn!(%label, attempt = retry + 1, error = %e, wait_ms = wait.as_millis() as u64, "retrying");
                sleep(wait);
                retry += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn test_delay_doubles() {
        let b = Backoff::new(5, Duration::from_secs(2));
        assert_eq!(b.delay(0), Duration::from_secs(2));
        assert_eq!(b.delay(1), Duration::from_secs(4));
        assert_eq!(b.delay(3), Duration::from_secs(16));
    }

    #[test]
    fn test_succeeds_after_failures() {
        let mut calls = 0;
        let result = with_backoff(Backoff::new(3, Duration::ZERO), "children", || {
            calls += 1;
            if calls < 3 {
                Err(SyncError::Api("x".into(), "HTTP 503".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_backoff(Backoff::new(2, Duration::ZERO), "children", || {
            calls += 1;
            Err(SyncError::Api("x".into(), "HTTP 503".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
