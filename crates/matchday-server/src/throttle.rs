//! Per-participant send throttle (token bucket).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use matchday_shared::ParticipantId;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct SendThrottle {
    buckets: Arc<Mutex<HashMap<ParticipantId, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl SendThrottle {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity: capacity.max(1.0),
        }
    }

    /// Take one send token for `participant`. `false` means over the limit.
    pub async fn check(&self, participant: ParticipantId) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(participant)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        let allowed = bucket.try_consume(self.rate, self.capacity);
        if !allowed {
            warn!(participant = %participant, "Send rate limit exceeded");
        }
        allowed
    }

    /// Forget buckets idle for longer than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_idle);
        before - buckets.len()
    }
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(2.0, 10.0)
    }
}
