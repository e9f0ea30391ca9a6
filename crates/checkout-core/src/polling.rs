//! # Bounded Verification Polling
//!
//! Asks a provider whether a payment went through, a bounded number of
//! times: fixed interval, attempt ceiling, overall deadline, and a timeout
//! on every call. The loop never blocks on the customer or the UI.
//!
//! `TimedOut` means "we don't know" (no definitive answer before the
//! bounds ran out) and is distinct from `Error`, which is a terminal
//! failure such as an explicit decline.

use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::Verification;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Bounds for one verification poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollPolicy {
    /// Wait before the first call, giving the provider time to settle
    #[serde(with = "millis", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Wait between calls
    #[serde(with = "millis", default = "default_interval")]
    pub interval: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Deadline for the whole poll, delays included
    #[serde(with = "millis", default = "default_max_duration")]
    pub max_duration: Duration,
    /// Deadline for a single provider call
    #[serde(with = "millis", default = "default_call_timeout")]
    pub call_timeout: Duration,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_attempts() -> u32 {
    4
}

fn default_max_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            interval: default_interval(),
            max_attempts: default_max_attempts(),
            max_duration: default_max_duration(),
            call_timeout: default_call_timeout(),
        }
    }
}

impl PollPolicy {
    pub fn validate(&self) -> CheckoutResult<()> {
        if self.max_attempts == 0 {
            return Err(CheckoutError::Configuration(
                "poll max_attempts must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() || self.max_duration.is_zero() {
            return Err(CheckoutError::Configuration(
                "poll timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// How a poll ended
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Provider confirmed payment
    Paid(Verification),
    /// Provider answered, but the payment is not complete
    NotYetPaid,
    /// No definitive answer within the bounds
    TimedOut,
    /// Terminal failure; polling again cannot help
    Error(CheckoutError),
}

/// Run `check` until it reports paid, fails terminally, or the bounds run out.
///
/// Transient errors (see [`CheckoutError::is_retryable`]) and call timeouts
/// count as attempts without an answer.
pub async fn poll<F, Fut>(policy: &PollPolicy, provider: &str, mut check: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CheckoutResult<Verification>>,
{
    let deadline = Instant::now() + policy.max_duration;
    let mut answered = false;

    if !policy.initial_delay.is_zero() {
        if Instant::now() + policy.initial_delay >= deadline {
            return PollOutcome::TimedOut;
        }
        sleep(policy.initial_delay).await;
    }

    for attempt in 1..=policy.max_attempts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(policy.call_timeout.min(remaining), check()).await {
            Ok(Ok(verification)) if verification.is_paid => {
                debug!(provider, attempt, "Provider confirmed payment");
                return PollOutcome::Paid(verification);
            }
            Ok(Ok(verification)) => {
                answered = true;
                debug!(provider, attempt, status = %verification.status, "Payment not complete yet");
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!(provider, attempt, error = %e, "Transient verification failure");
            }
            Ok(Err(e)) => return PollOutcome::Error(e),
            Err(_) => {
                warn!(provider, attempt, "Verification call timed out");
            }
        }

        if attempt < policy.max_attempts {
            if Instant::now() + policy.interval >= deadline {
                break;
            }
            sleep(policy.interval).await;
        }
    }

    if answered {
        PollOutcome::NotYetPaid
    } else {
        PollOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_secs(2),
            max_attempts: 4,
            max_duration: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn verification(is_paid: bool) -> Verification {
        Verification {
            is_paid,
            amount: if is_paid { 5239 } else { 0 },
            currency: None,
            transaction_id: Some("txn".into()),
            status: if is_paid { "COMPLETED" } else { "PENDING" }.into(),
            raw_payload: serde_json::Value::Null,
        }
    }

    /// Counts calls; paid from the `paid_from`th call on
    fn provider(calls: Arc<AtomicU32>, paid_from: u32) -> impl FnMut() -> std::future::Ready<CheckoutResult<Verification>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(verification(n >= paid_from)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_paid_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let outcome = poll(&policy(), "test", provider(calls.clone(), 3)).await;

        assert!(matches!(outcome, PollOutcome::Paid(v) if v.amount == 5239));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling_gives_not_yet_paid() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = poll(&policy(), "test", provider(calls.clone(), u32::MAX)).await;

        assert!(matches!(outcome, PollOutcome::NotYetPaid));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_only_time_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = poll(&policy(), "test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(CheckoutError::NetworkError {
                provider: "test".into(),
                message: "connection reset".into(),
            }))
        })
        .await;

        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = poll(&policy(), "test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(CheckoutError::PaymentDeclined {
                provider: "test".into(),
                reason: "VOIDED".into(),
            }))
        })
        .await;

        assert!(matches!(outcome, PollOutcome::Error(CheckoutError::PaymentDeclined { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_is_bounded_by_deadline() {
        let policy = PollPolicy {
            max_duration: Duration::from_secs(12),
            ..policy()
        };
        let started = Instant::now();

        let outcome = poll(&policy, "test", || async {
            sleep(Duration::from_secs(3600)).await;
            Ok(verification(true))
        })
        .await;

        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert!(started.elapsed() <= Duration::from_secs(12));
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: PollPolicy = toml::from_str("interval = 500\nmax_attempts = 10").unwrap();
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.call_timeout, Duration::from_secs(10));
        assert!(policy.validate().is_ok());

        let zero = PollPolicy { max_attempts: 0, ..policy };
        assert!(zero.validate().is_err());
    }
}
