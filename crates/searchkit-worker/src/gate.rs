use parking_lot::Mutex;
use searchkit_core::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Fastest refill the bucket honours: one token per millisecond.
const MIN_REFILL_INTERVAL: Duration = Duration::from_millis(1);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket bounding how fast provider calls may start.
///
/// Starts full; refills continuously at `refill_rate` tokens per second.
pub struct TokenBucket {
    max_tokens: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket.
    /// - `max_tokens`: burst size (at least 1)
    /// - `refill_rate`: tokens added per second, capped at one per millisecond
    pub fn new(max_tokens: usize, refill_rate: f64) -> Self {
        let max_tokens = max_tokens.max(1) as f64;
        let max_rate = 1.0 / MIN_REFILL_INTERVAL.as_secs_f64();
        Self {
            max_tokens,
            refill_rate: refill_rate.clamp(f64::MIN_POSITIVE, max_rate),
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token now, or report how long until one is available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate);
            Err(wait.max(MIN_REFILL_INTERVAL))
        }
    }

    /// Wait for a token. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let wait = match self.try_take() {
                Ok(()) => return true,
                Err(wait) => wait,
            };
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("max_tokens", &self.max_tokens)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}

/// Bounds outstanding provider calls and, optionally, their start rate.
#[derive(Debug, Clone)]
pub struct DispatchGate {
    permits: Arc<Semaphore>,
    bucket: Option<Arc<TokenBucket>>,
    size: usize,
}

impl DispatchGate {
    /// `max_concurrent` permits; `requests_per_second <= 0` disables the bucket.
    pub fn new(max_concurrent: usize, requests_per_second: f64) -> Self {
        let size = max_concurrent.max(1);
        let bucket = (requests_per_second > 0.0)
            .then(|| Arc::new(TokenBucket::new(size, requests_per_second)));
        Self {
            permits: Arc::new(Semaphore::new(size)),
            bucket,
            size,
        }
    }

    /// Number of concurrent permits.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a permit and then a rate token.
    ///
    /// Returns `None` when `cancel` fires during either wait; no permit is held
    /// in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return None;
        }
        let permit = tokio::select! {
            _ = cancel.cancelled() => return None,
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
        };
        if let Some(bucket) = &self.bucket {
            if !bucket.acquire(cancel).await {
                return None;
            }
        }
        Some(permit)
    }
}
