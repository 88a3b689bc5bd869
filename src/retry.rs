use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;

use crate::{Request, SendOutcome, Sender, SlingError};

/// What the retry loop does with a send outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    Retry,
    Terminal,
}

/// Classifies a send outcome as retryable or terminal.
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, outcome: &SendOutcome) -> RetryDecision;
}

impl<F> RetryPolicy for F
where
    F: Fn(&SendOutcome) -> RetryDecision + Send + Sync,
{
    fn decide(&self, outcome: &SendOutcome) -> RetryDecision {
        self(outcome)
    }
}

/// Retries transient transport failures, 429, 5xx, and out-of-range statuses.
///
/// Redirect exhaustion, unsupported schemes, certificate failures, and
/// cancellation are terminal, as is every other status.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn decide(&self, outcome: &SendOutcome) -> RetryDecision {
        if let Some(error) = &outcome.error {
            return match error {
                SlingError::Transport { kind, .. } if kind.is_permanent() => RetryDecision::Terminal,
                SlingError::Transport { .. } => RetryDecision::Retry,
                _ => RetryDecision::Terminal,
            };
        }

        match outcome.status() {
            Some(status) if should_retry_status(status) => RetryDecision::Retry,
            _ => RetryDecision::Terminal,
        }
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    let code = status.as_u16();
    code == StatusCode::TOO_MANY_REQUESTS.as_u16() || !(100..=599).contains(&code) || code >= 500
}

/// Computes the wait before retry number `attempt` (zero-based).
pub trait Backoff: Send + Sync {
    fn wait(&self, attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u32, Duration, Duration) -> Duration + Send + Sync,
{
    fn wait(&self, attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration {
        self(attempt, min_wait, max_wait)
    }
}

/// `min(max_wait, min_wait * 2^attempt)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExponentialBackoff;

impl Backoff for ExponentialBackoff {
    fn wait(&self, attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration {
        exponential(attempt, min_wait, max_wait)
    }
}

/// Uniform draw in `[0, exponential]`, spreading out synchronized clients.
#[derive(Clone, Copy, Debug, Default)]
pub struct JitteredBackoff;

impl Backoff for JitteredBackoff {
    fn wait(&self, attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration {
        let ceiling = exponential(attempt, min_wait, max_wait);
        let ceiling_nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::thread_rng().gen_range(0..=ceiling_nanos))
    }
}

fn exponential(attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration {
    let exp = attempt.min(31);
    let multiplier = 1u32 << exp;
    min_wait.saturating_mul(multiplier).min(max_wait)
}

/// Retry configuration for [`RetrySender`].
#[derive(Clone)]
pub struct RetryOptions {
    max_retries: u32,
    min_wait: Duration,
    max_wait: Duration,
    policy: Arc<dyn RetryPolicy>,
    backoff: Arc<dyn Backoff>,
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("min_wait", &self.min_wait)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            policy: Arc::new(DefaultRetryPolicy),
            backoff: Arc::new(ExponentialBackoff),
        }
    }
}

impl RetryOptions {
    /// Retries after the first attempt; `n` retries means up to `n + 1` sends.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total sends including the first; `0` is treated as `1`.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_retries = max_attempts.saturating_sub(1);
        self
    }

    pub fn min_wait(mut self, min_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = self.max_wait.max(min_wait);
        self
    }

    /// Upper bound for a single wait; never below `min_wait`.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(self.min_wait);
        self
    }

    pub fn policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn retries(&self) -> u32 {
        self.max_retries
    }

    pub fn wait_bounds(&self) -> (Duration, Duration) {
        (self.min_wait, self.max_wait)
    }
}

enum State {
    Sending,
    Waiting { wait: Duration, last: SendOutcome },
    Done(SendOutcome),
}

/// Wraps a [`Sender`] with bounded retry, exposing the same contract.
///
/// Attempts are counted per execution, so one `RetrySender` can serve any
/// number of concurrent requests. Waits are abandoned as soon as the request
/// context is cancelled or its deadline fires.
#[derive(Clone)]
pub struct RetrySender {
    inner: Arc<dyn Sender>,
    options: RetryOptions,
}

impl fmt::Debug for RetrySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySender")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RetrySender {
    pub fn new(inner: Arc<dyn Sender>, options: RetryOptions) -> Self {
        Self { inner, options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }
}

#[async_trait]
impl Sender for RetrySender {
    async fn execute(&self, request: &Request) -> SendOutcome {
        let context = request.context();
        let options = &self.options;
        let mut attempt = 0u32;
        let mut state = State::Sending;

        loop {
            state = match state {
                State::Sending => {
                    let outcome = self.inner.execute(request).await;
                    if options.policy.decide(&outcome) == RetryDecision::Terminal
                        || attempt >= options.max_retries
                    {
                        State::Done(outcome)
                    } else {
                        let wait = options
                            .backoff
                            .wait(attempt, options.min_wait, options.max_wait);
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            attempt = attempt + 1,
                            max_retries = options.max_retries,
                            wait_ms = wait.as_millis() as u64,
                            status = ?outcome.status(),
                            "retrying request"
                        );
                        State::Waiting {
                            wait,
                            last: outcome,
                        }
                    }
                }
                State::Waiting { wait, last } => {
                    let interrupted = match context.interrupted() {
                        Some(reason) => Some(reason),
                        None => tokio::select! {
                            biased;
                            reason = context.done() => Some(reason),
                            () = tokio::time::sleep(wait) => context.interrupted(),
                        },
                    };
                    match interrupted {
                        Some(reason) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(attempt, %reason, "retry abandoned");
                            State::Done(last.interrupted(reason))
                        }
                        None => {
                            attempt += 1;
                            State::Sending
                        }
                    }
                }
                State::Done(outcome) => return outcome,
            };
        }
    }
}
