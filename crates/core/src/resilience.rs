use crate::config::ResiliencePolicy;
use crate::error::{EmbeddingError, SynthesisError};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Error types returned by guarded external services.
pub trait ServiceFailure: std::error::Error {
    fn is_transient(&self) -> bool;
    fn circuit_open() -> Self;
}

fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

fn is_transient_http(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

impl ServiceFailure for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Http(error) => is_transient_http(error),
            EmbeddingError::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    fn circuit_open() -> Self {
        EmbeddingError::CircuitOpen
    }
}

impl ServiceFailure for SynthesisError {
    fn is_transient(&self) -> bool {
        match self {
            SynthesisError::Http(error) => is_transient_http(error),
            SynthesisError::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    fn circuit_open() -> Self {
        SynthesisError::CircuitOpen
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    /// Id of the single call admitted after the cool-down, while it runs.
    trial: Option<u64>,
    next_trial: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

/// Permission for one call. A half-open trial that is dropped without
/// settling hands the trial slot to the next caller.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.trial {
            self.breaker.release_trial(id);
        }
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `None` when the call must fail fast, otherwise the trial id if this
    /// call is the half-open trial.
    fn try_admit(&self) -> Option<Option<u64>> {
        let mut state = self.lock();
        let open_until = state.open_until;
        match open_until {
            None => Some(None),
            Some(until) if Instant::now() < until => None,
            Some(_) if state.trial.is_some() => None,
            Some(_) => {
                let id = state.next_trial;
                state.next_trial = state.next_trial.wrapping_add(1);
                state.trial = Some(id);
                Some(Some(id))
            }
        }
    }

    fn admit(&self) -> Option<Admission<'_>> {
        self.try_admit().map(|trial| Admission {
            breaker: self,
            trial,
        })
    }

    fn release_trial(&self, id: u64) {
        let mut state = self.lock();
        if state.trial == Some(id) {
            state.trial = None;
        }
    }

    /// Whether a call may go out now. After the cool-down exactly one trial
    /// call is let through until it is recorded; a failed trial re-opens the
    /// breaker.
    pub fn allow(&self) -> bool {
        self.try_admit().is_some()
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.open_until = None;
        state.trial = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.trial.take().is_some() || state.consecutive_failures >= self.threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock()
            .open_until
            .is_some_and(|until| Instant::now() < until)
    }
}

/// Bounded retries with exponential backoff plus a circuit breaker, for one
/// external service.
#[derive(Debug)]
pub struct ServiceGuard {
    service: &'static str,
    policy: ResiliencePolicy,
    breaker: CircuitBreaker,
}

impl ServiceGuard {
    pub fn new(service: &'static str, policy: &ResiliencePolicy) -> Self {
        Self {
            service,
            policy: policy.clone(),
            breaker: CircuitBreaker::new(policy.breaker_threshold, policy.breaker_cooldown()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn call<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: ServiceFailure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1u32;
        loop {
            let Some(_admission) = self.breaker.admit() else {
                warn!(service = self.service, "circuit open, failing fast");
                return Err(E::circuit_open());
            };

            match operation().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) if error.is_transient() => {
                    self.breaker.record_failure();
                    if attempt >= self.policy.max_attempts {
                        return Err(error);
                    }

                    let delay = self.policy.backoff(attempt);
                    warn!(
                        service = self.service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
