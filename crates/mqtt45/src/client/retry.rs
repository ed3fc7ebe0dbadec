//! Reconnect backoff policies and retry filtering.

use crate::client::state::CloseReason;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns true for close reasons that must NOT be retried.
pub type RetryFilter = Arc<dyn Fn(&CloseReason) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum RetryPolicy {
    /// Delay grows by `scale` per attempt: scale, 2*scale, 3*scale, ...
    Linear { scale: Duration },
    /// Constant delay between attempts.
    Equals { interval: Duration },
    /// Uniformly random delay in `[min, max]`.
    Random { min: Duration, max: Duration },
    /// scale * base^(attempt-1), clamped to `max`.
    Exponential {
        base: u32,
        scale: Duration,
        max: Duration,
    },
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1);
        match self {
            Self::Linear { scale } => scale.saturating_mul(attempt),
            Self::Equals { interval } => *interval,
            Self::Random { min, max } => {
                if max <= min {
                    *min
                } else {
                    let span = max.as_millis().saturating_sub(min.as_millis()) as u64;
                    let offset = rand::thread_rng().gen_range(0..=span);
                    *min + Duration::from_millis(offset)
                }
            }
            Self::Exponential { base, scale, max } => {
                let factor = base.saturating_pow(attempt.saturating_sub(1));
                scale.saturating_mul(factor).min(*max)
            }
        }
    }
}

#[derive(Clone)]
pub struct RetryConfig {
    pub policy: RetryPolicy,
    /// Upper bound on consecutive failed attempts.
    pub limit: u32,
    /// `true` means "do not retry this reason". Defaults to rejecting
    /// deliberate client closes.
    pub filter: Option<RetryFilter>,
}

impl RetryConfig {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            limit: u32::MAX,
            filter: None,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: RetryFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Attempt-counting wrapper consulted on every closed transition.
pub(crate) struct Retrier {
    config: RetryConfig,
    attempts: AtomicU32,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: AtomicU32::new(0),
        }
    }

    /// Next reconnect delay, or `None` when the filter rejects the
    /// reason or the attempt limit is exhausted. Reasons that forbid
    /// retry outright never reach the filter.
    pub fn delay(&self, reason: &CloseReason) -> Option<Duration> {
        if reason.forbids_retry() {
            return None;
        }

        let rejected = match &self.config.filter {
            Some(filter) => filter(reason),
            None => matches!(reason, CloseReason::ClientClose(_)),
        };
        if rejected {
            return None;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        if attempt > self.config.limit {
            tracing::debug!(attempt, limit = self.config.limit, "retry limit exhausted");
            return None;
        }

        let delay = self.config.policy.delay_for_attempt(attempt);
        tracing::debug!(attempt, ?delay, "reconnect scheduled");
        Some(delay)
    }

    /// Called on a successful open.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt45_protocol::ReasonCode;

    fn transport_reason() -> CloseReason {
        CloseReason::TransportError {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_equals_policy() {
        let retrier = Retrier::new(RetryConfig::new(RetryPolicy::Equals {
            interval: Duration::from_secs(1),
        }));
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_linear_policy_grows() {
        let retrier = Retrier::new(RetryConfig::new(RetryPolicy::Linear {
            scale: Duration::from_millis(100),
        }));
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_millis(200))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_exponential_clamps_to_max() {
        let retrier = Retrier::new(RetryConfig::new(RetryPolicy::Exponential {
            base: 2,
            scale: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }));
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(4))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            retrier.delay(&transport_reason()),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_random_policy_within_bounds() {
        let retrier = Retrier::new(RetryConfig::new(RetryPolicy::Random {
            min: Duration::from_millis(100),
            max: Duration::from_millis(500),
        }));
        for _ in 0..50 {
            let delay = retrier.delay(&transport_reason()).unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_limit_exhaustion_and_reset() {
        let retrier = Retrier::new(
            RetryConfig::new(RetryPolicy::Equals {
                interval: Duration::from_secs(1),
            })
            .with_limit(2),
        );
        assert!(retrier.delay(&transport_reason()).is_some());
        assert!(retrier.delay(&transport_reason()).is_some());
        assert!(retrier.delay(&transport_reason()).is_none());

        retrier.reset();
        assert!(retrier.delay(&transport_reason()).is_some());
    }

    #[test]
    fn test_filter_rejects_reason() {
        let retrier = Retrier::new(
            RetryConfig::new(RetryPolicy::Equals {
                interval: Duration::from_secs(1),
            })
            .with_filter(Arc::new(|reason| {
                matches!(
                    reason,
                    CloseReason::ServerClose(ReasonCode::QuotaExceeded)
                )
            })),
        );
        assert!(retrier
            .delay(&CloseReason::ServerClose(ReasonCode::QuotaExceeded))
            .is_none());
        assert!(retrier
            .delay(&CloseReason::ServerClose(ReasonCode::ServerBusy))
            .is_some());
    }

    #[test]
    fn test_default_filter_rejects_client_close() {
        let retrier = Retrier::new(RetryConfig::new(RetryPolicy::Equals {
            interval: Duration::from_secs(1),
        }));
        assert!(retrier
            .delay(&CloseReason::ClientClose(ReasonCode::Success))
            .is_none());
    }

    #[test]
    fn test_network_unavailable_never_retries() {
        // Even a filter that allows everything cannot override this.
        let retrier = Retrier::new(
            RetryConfig::new(RetryPolicy::Equals {
                interval: Duration::from_secs(1),
            })
            .with_filter(Arc::new(|_| false)),
        );
        assert!(retrier.delay(&CloseReason::NetworkUnavailable).is_none());
    }

    #[test]
    fn test_network_down_transport_error_never_retries() {
        use std::io::ErrorKind;

        let retrier = Retrier::new(
            RetryConfig::new(RetryPolicy::Equals {
                interval: Duration::from_secs(1),
            })
            .with_filter(Arc::new(|_| false)),
        );
        for kind in [ErrorKind::NetworkDown, ErrorKind::NetworkUnreachable] {
            let reason = CloseReason::TransportError {
                kind,
                message: "network gone".to_string(),
            };
            assert!(retrier.delay(&reason).is_none(), "{kind:?} must never retry");
        }
    }
}
