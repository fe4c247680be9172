//! §4.5: a three-state gate around one named unit of work. State
//! transitions are serialized behind a single lock so admission decisions
//! stay O(1) and atomic (§5) — the teacher's breaker spreads state across
//! several independently-locked fields; this one folds them into a single
//! guarded struct so a transition can never be observed half-applied.

use chatgate_core::{ErrorCode, GatewayError};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub max_concurrent_requests: u32,
}

impl Default for CircuitBreakerConfig {
    /// §4.5 parameters, verbatim.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            max_concurrent_requests: 100,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes_in_half_open: u32,
    opened_at: Option<Instant>,
    in_flight: u32,
    half_open_probe_taken: bool,
}

/// A snapshot for telemetry/health reporting; never used to drive logic.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub in_flight: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

enum Outcome {
    Success,
    Failure,
    Neutral,
}

/// Tracks one admitted call. Dropping it without calling [`Self::finish`]
/// (e.g. the guarded future itself is cancelled and never polled to
/// completion) only releases the in-flight slot — it records no outcome,
/// matching §4.5's treatment of cancellation as breaker-neutral.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    was_half_open_probe: bool,
    finished: bool,
}

impl<'a> Admission<'a> {
    fn finish(mut self, outcome_is_success: Option<bool>) {
        self.finished = true;
        let outcome = match outcome_is_success {
            None => Outcome::Neutral,
            Some(true) => Outcome::Success,
            Some(false) => Outcome::Failure,
        };
        self.breaker.release(outcome, self.was_half_open_probe);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.release(Outcome::Neutral, self.was_half_open_probe);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes_in_half_open: 0,
                opened_at: None,
                in_flight: 0,
                half_open_probe_taken: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            in_flight: inner.in_flight,
        }
    }

    fn try_admit(&self) -> Result<Admission<'_>, GatewayError> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.open_timeout)
                .unwrap_or(false);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes_in_half_open = 0;
                inner.half_open_probe_taken = false;
            } else {
                return Err(GatewayError::BreakerOpen(self.name.clone()));
            }
        }

        let is_half_open_probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if inner.half_open_probe_taken {
                    return Err(GatewayError::BreakerOpen(self.name.clone()));
                }
                true
            }
            CircuitState::Open => unreachable!("handled above"),
        };

        if inner.in_flight >= self.config.max_concurrent_requests {
            return Err(GatewayError::BreakerSaturated(self.name.clone()));
        }

        inner.in_flight += 1;
        if is_half_open_probe {
            inner.half_open_probe_taken = true;
        }

        Ok(Admission {
            breaker: self,
            was_half_open_probe: is_half_open_probe,
            finished: false,
        })
    }

    fn release(&self, outcome: Outcome, was_half_open_probe: bool) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if was_half_open_probe && inner.state == CircuitState::HalfOpen {
            inner.half_open_probe_taken = false;
        }

        match outcome {
            Outcome::Neutral => {}
            Outcome::Success => match inner.state {
                CircuitState::Closed => inner.consecutive_failures = 0,
                CircuitState::HalfOpen => {
                    inner.consecutive_successes_in_half_open += 1;
                    if inner.consecutive_successes_in_half_open >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.consecutive_failures = 0;
                        inner.consecutive_successes_in_half_open = 0;
                    }
                }
                CircuitState::Open => {}
            },
            Outcome::Failure => {
                inner.consecutive_failures += 1;
                match inner.state {
                    CircuitState::Closed => {
                        if inner.consecutive_failures >= self.config.failure_threshold {
                            inner.state = CircuitState::Open;
                            inner.opened_at = Some(Instant::now());
                        }
                    }
                    CircuitState::HalfOpen => {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        inner.consecutive_successes_in_half_open = 0;
                    }
                    CircuitState::Open => {}
                }
            }
        }
    }

    /// Runs `f` through the breaker. Refuses without calling `f` at all
    /// when Open or saturated (§4.5). Classifies the result per §4.5:
    /// cancelled is neutral, bad_request (and anything else not
    /// explicitly a breaker failure) counts as success, agent_failure and
    /// timeout count as failure.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let admission = self.try_admit()?;
        let result = f().await;
        let outcome = match &result {
            Ok(_) => Some(true),
            Err(e) if e.code() == ErrorCode::Cancelled => None,
            Err(e) if e.code().is_breaker_failure() => Some(false),
            Err(_) => Some(true),
        };
        admission.finish(outcome);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(50),
            max_concurrent_requests: 2,
        }
    }

    async fn fail() -> Result<(), GatewayError> {
        Err(GatewayError::AgentFailure("boom".into()))
    }

    async fn ok() -> Result<(), GatewayError> {
        Ok(())
    }

    #[tokio::test]
    async fn opens_after_threshold_and_recovers() {
        let cb = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            let _ = cb.call(fail).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.call(ok).await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.call(ok).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.call(ok).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            let _ = cb.call(fail).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(fail).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn bad_request_does_not_count_as_failure() {
        let cb = CircuitBreaker::new("test", config());
        for _ in 0..10 {
            let _ = cb
                .call(|| async { Err::<(), _>(GatewayError::BadRequest("nope".into())) })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancelled_is_neutral() {
        let cb = CircuitBreaker::new("test", config());
        for _ in 0..10 {
            let _ = cb.call(|| async { Err::<(), _>(GatewayError::Cancelled) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn saturates_in_flight_cap() {
        let cb = std::sync::Arc::new(CircuitBreaker::new("test", config()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(rx)));

        let cb1 = cb.clone();
        let rx1 = rx.clone();
        let h1 = tokio::spawn(async move {
            cb1.call(|| async move {
                rx1.lock().await.take().unwrap().await.ok();
                Ok::<(), GatewayError>(())
            })
            .await
        });

        let cb2 = cb.clone();
        let h2 = tokio::spawn(async move { cb2.call(ok).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let third = cb.call(ok).await;
        assert!(matches!(third, Err(GatewayError::BreakerSaturated(_))));

        tx.send(()).ok();
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();
    }
}
