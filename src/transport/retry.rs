//! Retry with backoff for transient transport failures.
//!
//! The retry loop is a small state machine owned by a single task:
//!
//! ```text
//! idle -> attempting -> succeeded
//!                    -> failed-permanent   (error marked permanent)
//!                    -> attempting         (after a backoff sleep)
//!                    -> failed-exhausted   (out of attempts, or cancelled)
//! ```
//!
//! Only transient errors are retried. Cancellation is checked before every
//! attempt and interrupts the backoff sleep, so an outer deadline bounds the
//! whole loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Transport, TransportError, TransportKey};
use crate::notification::Notification;
use crate::validate::Validate;

/// How long to wait between attempts.
///
/// Delays are a pure function of the attempt number, so every retry loop
/// starts from a fresh schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Constant(Duration),

    /// `initial * multiplier^attempt`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Backoff {
    /// 1s, 2s, 4s, ... capped at 30s.
    pub const DEFAULT: Self = Backoff::Exponential {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(30),
        multiplier: 2.0,
    };

    /// Computes the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Constant(delay) => delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                if initial.is_zero() {
                    return Duration::ZERO;
                }
                // Multipliers outside [1, inf) are treated as constant backoff.
                let factor = if multiplier.is_finite() && multiplier >= 1.0 {
                    multiplier
                } else {
                    1.0
                };
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay_secs = initial.as_secs_f64() * factor.powi(exponent);
                Duration::try_from_secs_f64(delay_secs).map_or(max, |delay| delay.min(max))
            }
        }
    }

    /// Builds an exponential schedule, rejecting multipliers that would
    /// shrink or break it.
    pub fn exponential(
        initial: Duration,
        max: Duration,
        multiplier: f64,
    ) -> Result<Self, InvalidBackoff> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(InvalidBackoff::Multiplier(multiplier));
        }
        if initial > max {
            return Err(InvalidBackoff::InitialAboveMax { initial, max });
        }
        Ok(Backoff::Exponential {
            initial,
            max,
            multiplier,
        })
    }
}

/// Rejected [`Backoff::exponential`] parameters.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidBackoff {
    #[error("backoff multiplier must be finite and at least 1.0, got {0}")]
    Multiplier(f64),

    #[error("initial backoff {initial:?} exceeds the cap {max:?}")]
    InitialAboveMax { initial: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration for [`WithRetry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first. Never less than one.
    pub max_tries: u32,

    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl RetryConfig {
    /// 3 tries with the default exponential backoff (1s, 2s).
    pub const DEFAULT: Self = Self {
        max_tries: 3,
        backoff: Backoff::DEFAULT,
    };

    /// Clamps `max_tries` to at least one.
    pub fn new(max_tries: u32, backoff: Backoff) -> Self {
        Self {
            max_tries: max_tries.max(1),
            backoff,
        }
    }

    /// Returns an iterator over the delays slept between attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_tries.saturating_sub(1)).map(|attempt| self.backoff.delay_for_attempt(attempt))
    }

    /// The longest the loop can spend sleeping.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Result of a retry loop.
#[derive(Debug)]
pub enum RetryResult<T> {
    /// The operation succeeded.
    Success(T),

    /// A transient error persisted through every attempt, or the loop was
    /// cancelled before it could try again.
    ExhaustedRetries {
        /// The last error encountered.
        last_error: TransportError,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A permanent error occurred (not retriable).
    PermanentError(TransportError),
}

impl<T> RetryResult<T> {
    /// Collapses the outcome into a plain `Result`.
    pub fn into_result(self) -> Result<T, TransportError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError(e) => Err(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Runs `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    cancel: &CancellationToken,
    key: &TransportKey,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let max_attempts = config.max_tries.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryResult::ExhaustedRetries {
                last_error: TransportError::cancelled(),
                attempts: attempt,
            };
        }

        attempt += 1;
        let e = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => e,
        };

        if e.is_permanent() {
            return RetryResult::PermanentError(e);
        }
        if attempt >= max_attempts {
            return RetryResult::ExhaustedRetries {
                last_error: e,
                attempts: attempt,
            };
        }

        let delay = config.backoff.delay_for_attempt(attempt - 1);
        warn!(
            transport = %key,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Push failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return RetryResult::ExhaustedRetries { last_error: e, attempts: attempt };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Retries transient failures of the wrapped transport.
pub struct WithRetry {
    inner: Arc<dyn Transport>,
    config: RetryConfig,
}

impl WithRetry {
    /// Retries `inner` according to `config`.
    pub fn new(inner: Arc<dyn Transport>, config: RetryConfig) -> Self {
        WithRetry { inner, config }
    }
}

#[async_trait]
impl Transport for WithRetry {
    fn key(&self) -> TransportKey {
        self.inner.key()
    }

    async fn push(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        let key = self.inner.key();
        retry_with_backoff(self.config, cancel, &key, || {
            self.inner.push(cancel, notification)
        })
        .await
        .into_result()
    }

    fn validator(&self) -> Option<&dyn Validate> {
        self.inner.validator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedTransport, notification};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_tries: u32) -> RetryConfig {
        RetryConfig::new(max_tries, Backoff::Constant(Duration::from_millis(1)))
    }

    // ─── Unit Tests ───────────────────────────────────────────────────────────

    #[test]
    fn default_config_values() {
        let config = RetryConfig::DEFAULT;
        assert_eq!(config.max_tries, 3);
        let delays: Vec<_> = config.delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn exponential_delays_respect_cap() {
        let backoff = Backoff::DEFAULT;
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(30));
    }

    #[test]
    fn uncapped_schedule_saturates_at_max() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::MAX,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(1024));
        assert_eq!(backoff.delay_for_attempt(70), Duration::MAX);
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::MAX);

        let config = RetryConfig::new(200, backoff);
        assert_eq!(config.total_max_wait(), Duration::MAX);
    }

    #[test]
    fn bad_multipliers_fall_back_to_constant_delay() {
        for multiplier in [-2.0, 0.0, 0.5, f64::NAN, f64::INFINITY] {
            let backoff = Backoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
                multiplier,
            };
            assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(1));
            assert_eq!(backoff.delay_for_attempt(7), Duration::from_secs(1));
        }
    }

    #[test]
    fn zero_initial_delay_stays_zero() {
        let backoff = Backoff::Exponential {
            initial: Duration::ZERO,
            max: Duration::MAX,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(5000), Duration::ZERO);
    }

    #[test]
    fn exponential_constructor_rejects_bad_parameters() {
        let one = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(
            Backoff::exponential(one, cap, -2.0),
            Err(InvalidBackoff::Multiplier(-2.0))
        );
        assert_eq!(
            Backoff::exponential(one, cap, 0.5),
            Err(InvalidBackoff::Multiplier(0.5))
        );
        assert!(matches!(
            Backoff::exponential(one, cap, f64::NAN),
            Err(InvalidBackoff::Multiplier(_))
        ));
        assert_eq!(
            Backoff::exponential(cap, one, 2.0),
            Err(InvalidBackoff::InitialAboveMax { initial: cap, max: one })
        );
        assert_eq!(Backoff::exponential(one, cap, 2.0), Ok(Backoff::DEFAULT));
    }

    #[test]
    fn zero_tries_means_one() {
        assert_eq!(RetryConfig::new(0, Backoff::DEFAULT).max_tries, 1);
        assert_eq!(RetryConfig::new(1, Backoff::DEFAULT).total_max_wait(), Duration::ZERO);
    }

    #[tokio::test]
    async fn success_on_first_attempt_calls_once() {
        let counter = AtomicU32::new(0);
        let key = TransportKey::new("t");
        let result = retry_with_backoff(fast(3), &CancellationToken::new(), &key, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TransportError>(42) }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let counter = AtomicU32::new(0);
        let key = TransportKey::new("t");
        let result = retry_with_backoff(fast(5), &CancellationToken::new(), &key, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::permanent("no chat id")) }
        })
        .await;

        assert!(matches!(result, RetryResult::PermanentError(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_exhausts_after_max_tries() {
        let counter = AtomicU32::new(0);
        let key = TransportKey::new("t");
        let result = retry_with_backoff(fast(4), &CancellationToken::new(), &key, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::transient("always fails")) }
        })
        .await;

        match result {
            RetryResult::ExhaustedRetries { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error.message, "always fails");
            }
            other => panic!("Expected ExhaustedRetries, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_stops_new_attempts() {
        let counter = AtomicU32::new(0);
        let key = TransportKey::new("t");
        let cancel = CancellationToken::new();
        let config = RetryConfig::new(10, Backoff::Constant(Duration::from_secs(60)));

        let result = retry_with_backoff(config, &cancel, &key, || {
            counter.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            async { Err::<(), _>(TransportError::transient("down")) }
        })
        .await;

        assert!(matches!(result, RetryResult::ExhaustedRetries { attempts: 1, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_attempt() {
        let counter = AtomicU32::new(0);
        let key = TransportKey::new("t");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = retry_with_backoff(fast(3), &cancel, &key, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TransportError>(()) }
        })
        .await;

        assert!(matches!(result, RetryResult::ExhaustedRetries { attempts: 0, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn with_retry_succeeds_on_third_attempt() {
        let inner = Arc::new(ScriptedTransport::new(
            "flaky",
            vec![
                Err(TransportError::transient("503")),
                Err(TransportError::transient("503")),
                Ok(()),
            ],
        ));
        let transport = WithRetry::new(inner.clone(), fast(3));

        let result = transport
            .push(&CancellationToken::new(), &notification("com.example.x", &[]))
            .await;

        assert!(result.is_ok());
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn with_retry_permanent_calls_once() {
        let inner = Arc::new(ScriptedTransport::new(
            "chat",
            vec![Err(TransportError::permanent("no slack id"))],
        ));
        let transport = WithRetry::new(inner.clone(), fast(5));

        let err = transport
            .push(&CancellationToken::new(), &notification("com.example.x", &[]))
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn with_retry_keeps_inner_key() {
        let inner = Arc::new(ScriptedTransport::new("slack", vec![]));
        assert_eq!(WithRetry::new(inner, fast(2)).key(), TransportKey::new("slack"));
    }

    // ─── Property Tests ───────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            initial_ms in 1u64..1000,
            max_ms in 1000u64..60000,
            multiplier in 1.5f64..3.0,
            attempt in 0u32..20,
        ) {
            let backoff = Backoff::Exponential {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                multiplier,
            };
            prop_assert!(backoff.delay_for_attempt(attempt) <= Duration::from_millis(max_ms));
        }

        #[test]
        fn delay_sequence_is_monotonic(
            initial_ms in 1u64..1000,
            max_ms in 1000u64..60000,
            multiplier in 1.0f64..3.0,
            max_tries in 1u32..15,
        ) {
            let config = RetryConfig::new(max_tries, Backoff::Exponential {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                multiplier,
            });
            let delays: Vec<_> = config.delays().collect();
            prop_assert_eq!(delays.len() as u32, max_tries - 1);
            for window in delays.windows(2) {
                prop_assert!(window[1] >= window[0]);
            }
        }

        #[test]
        fn attempts_bounded_by_max_tries(max_tries in 1u32..6, failures in 0u32..10) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let counter = AtomicU32::new(0);
            let key = TransportKey::new("t");
            let result = rt.block_on(retry_with_backoff(
                RetryConfig::new(max_tries, Backoff::Constant(Duration::ZERO)),
                &CancellationToken::new(),
                &key,
                || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < failures { Err(TransportError::transient("x")) } else { Ok(()) }
                    }
                },
            ));
            let calls = counter.load(Ordering::SeqCst);
            prop_assert!(calls <= max_tries);
            prop_assert_eq!(result.is_success(), failures < max_tries);
            prop_assert_eq!(calls, (failures + 1).min(max_tries));
        }
    }
}
