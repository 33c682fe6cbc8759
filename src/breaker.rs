use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{ErrorKind, Result};

/// Breaker state machine: closed → open after `threshold` consecutive
/// qualifying failures → half-open once the reset timeout elapses → closed
/// on the next success (or straight back to open on failure).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Guards the transport against a structurally broken client (unreachable
/// host, bad DNS): once `threshold` consecutive transport failures occur,
/// calls fail fast without touching the network until `reset` elapses.
///
/// One instance is owned per client; state updates happen synchronously
/// inside a single mutex acquisition, so interleaved async calls cannot
/// observe a half-applied transition. A stale failure arriving after a newer
/// success re-counts from zero (last write wins).
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    reset: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
            threshold: threshold.max(1),
            reset,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Gate before a transport attempt. While open, rejects with
    /// [`ErrorKind::CircuitOpen`] until the reset timeout elapses, at which
    /// point the breaker moves to half-open and lets one probe through.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    let retry_in = self.reset.saturating_sub(elapsed);
                    Err(ErrorKind::CircuitOpen {
                        retry_in_ms: retry_in.as_millis() as u64,
                    }
                    .into())
                }
            }
        }
    }

    /// Resets the failure counter and closes the breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    /// Counts a qualifying failure; opens at the threshold, and a half-open
    /// probe failure re-opens immediately.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        if inner.failures >= self.threshold || inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Administrative trip: opens the breaker immediately, surfacing a known
    /// structural defect on the first call instead of after repeated
    /// failures.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.failures = inner.failures.max(self.threshold);
        inner.opened_at = Some(Instant::now());
    }

    /// Runs `probe` under the breaker: rejects fast while open, records the
    /// outcome otherwise.
    pub async fn execute<T, F, Fut>(&self, probe: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check()?;
        match probe().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // State is plain data; a poisoned lock would mean a panic while
        // holding it, which none of the update paths can do.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CircuitBreaker, CircuitState};
    use crate::{ClientError, ErrorKind, Result};

    fn failing_probe() -> Result<()> {
        Err(ClientError::decode("probe failed"))
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.check().unwrap_err().kind(),
            ErrorKind::CircuitOpen { .. }
        ));
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_after_reset_then_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(20));
        breaker.force_open();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn execute_rejects_without_invoking_probe_while_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        let _ = breaker.execute(|| async { failing_probe() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut invoked = false;
        let result = breaker
            .execute(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(
            result.unwrap_err().kind(),
            ErrorKind::CircuitOpen { .. }
        ));
        assert!(!invoked);
    }

    #[test]
    fn force_open_trips_immediately() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        breaker.force_open();
        assert!(breaker.check().is_err());
    }
}
