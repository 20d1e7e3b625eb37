//! Bounded retry loop around a single network operation.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::envelope::http_error;
use super::error::{FetchError, TransportError};

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub body: String,
}

impl RawResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  /// A 200 response with the given body.
  pub fn ok(body: impl Into<String>) -> Self {
    Self::new(200, body)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
  /// `base * attempt`
  Linear { base: Duration },
  /// `base * 2^(attempt - 1)`, capped at `max`
  Exponential { base: Duration, max: Duration },
  /// Same delay every time
  Fixed(Duration),
}

impl Backoff {
  /// Delay to wait after failed attempt number `attempt` (1-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    match *self {
      Backoff::Linear { base } => base.saturating_mul(attempt),
      Backoff::Exponential { base, max } => {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(max)
      }
      Backoff::Fixed(delay) => delay,
    }
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Backoff::Linear {
      base: Duration::from_secs(1),
    }
  }
}

/// Timeout and retry settings for one logical operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Bound on each individual attempt
  pub timeout: Duration,
  /// Retries after the first attempt
  pub max_retries: u32,
  pub backoff: Backoff,
  /// HTTP statuses treated like transient failures
  pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      max_retries: 3,
      backoff: Backoff::default(),
      retry_statuses: vec![502, 503, 504],
    }
  }
}

impl RetryPolicy {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_retry_statuses(mut self, statuses: Vec<u16>) -> Self {
    self.retry_statuses = statuses;
    self
  }

  /// Whether `error` is worth another attempt: transport failures always are,
  /// HTTP failures only for the configured statuses.
  pub fn retries(&self, error: &FetchError) -> bool {
    error.is_transient()
      || error
        .status()
        .is_some_and(|status| self.retry_statuses.contains(&status))
  }

  /// Upper bound on the time one `run` can take.
  pub fn worst_case_latency(&self) -> Duration {
    let attempts = self.max_retries.saturating_add(1);
    let backoff_total = (1..=self.max_retries)
      .map(|attempt| self.backoff.delay(attempt))
      .fold(Duration::ZERO, Duration::saturating_add);
    self
      .timeout
      .saturating_mul(attempts)
      .saturating_add(backoff_total)
  }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
  Success,
  Timeout,
  NetworkError(String),
  HttpError(u16),
}

/// Record of one attempt inside the retry loop.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
  pub attempt_number: u32,
  pub started_at: DateTime<Utc>,
  pub outcome: AttemptOutcome,
}

/// Runs an idempotent operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct FetchExecutor {
  policy: RetryPolicy,
}

impl FetchExecutor {
  pub fn new(policy: RetryPolicy) -> Self {
    Self { policy }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Invoke `operation` until it succeeds, fails permanently, or the retry
  /// budget runs out.
  ///
  /// Each attempt races the operation against `policy.timeout`. Timeouts and
  /// connection failures are retried after `backoff(attempt)`; non-2xx
  /// responses fail immediately unless their status is in
  /// `policy.retry_statuses`. A 2xx response with an empty body is an
  /// `InvalidEnvelope` failure.
  pub async fn run<F, Fut>(&self, mut operation: F) -> Result<RawResponse, FetchError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RawResponse, TransportError>>,
  {
    let mut attempt_number = 1u32;
    debug!(
      max_retries = self.policy.max_retries,
      worst_case_ms = self.policy.worst_case_latency().as_millis() as u64,
      "starting fetch"
    );

    loop {
      let started_at = Utc::now();
      let result = tokio::time::timeout(self.policy.timeout, operation()).await;

      let (outcome, response) = match result {
        Err(_) | Ok(Err(TransportError::Timeout)) => (AttemptOutcome::Timeout, None),
        Ok(Err(TransportError::Connect(message))) => (AttemptOutcome::NetworkError(message), None),
        Ok(Ok(response)) if response.is_success() => (AttemptOutcome::Success, Some(response)),
        Ok(Ok(response)) => (AttemptOutcome::HttpError(response.status), Some(response)),
      };

      let attempt = FetchAttempt {
        attempt_number,
        started_at,
        outcome,
      };
      debug!(
        attempt = attempt.attempt_number,
        outcome = ?attempt.outcome,
        elapsed_ms = (Utc::now() - attempt.started_at).num_milliseconds(),
        "fetch attempt finished"
      );

      let error = match (attempt.outcome, response) {
        (AttemptOutcome::Success, Some(response)) => {
          if response.body.trim().is_empty() {
            return Err(FetchError::InvalidEnvelope("empty response body".to_string()));
          }
          return Ok(response);
        }
        (AttemptOutcome::HttpError(status), Some(response)) => http_error(status, &response.body),
        (AttemptOutcome::Timeout, _) => FetchError::Timeout {
          attempts: attempt_number,
        },
        (AttemptOutcome::NetworkError(message), _) => FetchError::Network {
          attempts: attempt_number,
          message,
        },
        (_, None) => FetchError::Abandoned,
      };

      if !self.policy.retries(&error) {
        return Err(error);
      }

      if attempt_number > self.policy.max_retries {
        warn!(
          attempts = attempt_number,
          error = %error,
          "retry budget exhausted"
        );
        return Err(error);
      }

      let delay = self.policy.backoff.delay(attempt_number);
      debug!(
        attempt = attempt_number,
        max_retries = self.policy.max_retries,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "retrying after transient failure"
      );
      tokio::time::sleep(delay).await;
      attempt_number += 1;
    }
  }
}
