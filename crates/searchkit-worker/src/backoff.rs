use searchkit_core::{ErrorKind, WorkerOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry limits for embedding tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts (including the failing one) after which a task is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Cap for the exponential delay, before jitter.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&WorkerOptions::default())
    }
}

impl RetryPolicy {
    /// Policy from normalised worker options.
    pub fn from_options(options: &WorkerOptions) -> Self {
        let options = options.normalized();
        Self {
            max_attempts: options.max_attempts,
            base: options.backoff_base(),
            cap: options.backoff_max(),
        }
    }

    /// `min(base * 2^(attempt - 1), cap)`; attempts below 1 count as 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Source of retry jitter.
pub trait JitterSource: Send + Sync + std::fmt::Debug {
    /// A duration uniformly drawn from `[0, bound)`; zero when `bound` is zero.
    fn jitter(&self, bound: Duration) -> Duration;
}

/// Jitter drawn from the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsJitter;

impl JitterSource for OsJitter {
    fn jitter(&self, bound: Duration) -> Duration {
        let bound_nanos = u64::try_from(bound.as_nanos()).unwrap_or(u64::MAX);
        if bound_nanos == 0 {
            return Duration::ZERO;
        }
        let draw = || {
            let mut buf = [0u8; 8];
            getrandom::getrandom(&mut buf).ok()?;
            Some(u64::from_le_bytes(buf))
        };
        uniform_below(bound_nanos, draw).map_or(Duration::ZERO, Duration::from_nanos)
    }
}

/// Uniform value in `[0, bound)` from raw 64-bit draws. Draws below
/// `2^64 mod bound` are rejected so `% bound` carries no modulo bias.
/// `None` when a draw fails; `bound` must be non-zero.
fn uniform_below(bound: u64, mut draw: impl FnMut() -> Option<u64>) -> Option<u64> {
    let threshold = bound.wrapping_neg() % bound;
    loop {
        let x = draw()?;
        if x >= threshold {
            return Some(x % bound);
        }
    }
}

/// No jitter at all, for deterministic schedules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter(&self, _bound: Duration) -> Duration {
        Duration::ZERO
    }
}

/// What to do with a task after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Delete the task: embedded, or the entity no longer exists.
    Complete,
    /// Count the failure and retry after the delay.
    Retry(Duration),
    /// Give up and record a dead letter.
    DeadLetter,
}

/// Classify an attempt outcome.
///
/// `outcome` is `None` on success, otherwise the error's kind. `prior_attempts`
/// is the task's failure count before this attempt.
pub fn classify(
    outcome: Option<ErrorKind>,
    prior_attempts: u32,
    policy: &RetryPolicy,
    jitter: &dyn JitterSource,
) -> Decision {
    let kind = match outcome {
        None | Some(ErrorKind::NotFound) => return Decision::Complete,
        Some(kind) => kind,
    };
    let attempts = prior_attempts.saturating_add(1);
    if attempts >= policy.max_attempts || kind == ErrorKind::Permanent {
        return Decision::DeadLetter;
    }
    let delay = policy.backoff(attempts);
    Decision::Retry(delay + jitter.jitter(delay / 4))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            base: Duration::from_secs(5),
            cap: Duration::from_secs(600),
        }
    }

    #[derive(Debug)]
    struct MaxJitter;

    impl JitterSource for MaxJitter {
        fn jitter(&self, bound: Duration) -> Duration {
            bound.saturating_sub(Duration::from_nanos(1))
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(5));
        assert_eq!(p.backoff(1), Duration::from_secs(5));
        assert_eq!(p.backoff(2), Duration::from_secs(10));
        assert_eq!(p.backoff(3), Duration::from_secs(20));
        assert_eq!(p.backoff(7), Duration::from_secs(320));
        assert_eq!(p.backoff(8), Duration::from_secs(600));
        assert_eq!(p.backoff(40), Duration::from_secs(600));
        let mut last = Duration::ZERO;
        for attempt in 1..20 {
            let d = p.backoff(attempt);
            assert!(d >= last);
            last = d;
        }
    }

    #[test]
    fn test_success_and_not_found_complete() {
        let p = policy();
        assert_eq!(classify(None, 9, &p, &NoJitter), Decision::Complete);
        assert_eq!(
            classify(Some(ErrorKind::NotFound), 9, &p, &NoJitter),
            Decision::Complete
        );
    }

    #[test]
    fn test_permanent_dead_letters_immediately() {
        assert_eq!(
            classify(Some(ErrorKind::Permanent), 0, &policy(), &NoJitter),
            Decision::DeadLetter
        );
    }

    #[test]
    fn test_exhaustion_dead_letters_transient() {
        let p = policy();
        assert_eq!(
            classify(Some(ErrorKind::Transient), 8, &p, &NoJitter),
            Decision::Retry(Duration::from_secs(600))
        );
        assert_eq!(
            classify(Some(ErrorKind::Transient), 9, &p, &NoJitter),
            Decision::DeadLetter
        );
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let p = policy();
        for prior in 0..6u32 {
            let base = p.backoff(prior + 1);
            let Decision::Retry(low) = classify(Some(ErrorKind::Transient), prior, &p, &NoJitter)
            else {
                panic!("expected retry");
            };
            let Decision::Retry(high) =
                classify(Some(ErrorKind::Transient), prior, &p, &MaxJitter)
            else {
                panic!("expected retry");
            };
            assert_eq!(low, base);
            assert!(high < base + base / 4);
            assert!(high <= base.mul_f64(1.25));
        }
    }

    #[test]
    fn test_os_jitter_bounds() {
        assert_eq!(OsJitter.jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(OsJitter.jitter(Duration::from_millis(10)) < Duration::from_millis(10));
        }
    }

    #[test]
    fn test_uniform_below_rejects_biased_draws() {
        // 2^64 mod 10 = 6: draws 0..=5 would favour the low residues.
        let mut draws = [3, 5, u64::MAX].into_iter();
        assert_eq!(uniform_below(10, || draws.next()), Some(5));
        assert_eq!(draws.next(), None);

        let bound = 3u64 << 62;
        let mut draws = [7, (1u64 << 62) + 7].into_iter();
        assert_eq!(uniform_below(bound, || draws.next()), Some((1u64 << 62) + 7));

        let mut failing = std::iter::empty();
        assert_eq!(uniform_below(10, || failing.next()), None);
        let mut draws = [6].into_iter();
        assert_eq!(uniform_below(10, || draws.next()), Some(6));
    }
}
