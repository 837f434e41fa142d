// =============================================================================
// Rate limiter — token buckets keyed by request class
// =============================================================================
//
// The broker enforces hard per-second ceilings per account: 6 private GETs,
// 1 private POST, and 1 WebSocket subscribe/unsubscribe per IP. Every
// outgoing call funnels through here; there is no bypass path, so a storm of
// retries can never exceed the broker's ceiling.
//
// Buckets refill continuously (fractional tokens), and burst capacity equals
// one second's worth of rate. Waiters queue on a tokio mutex, which hands the
// lock out in FIFO order, so calls are served in arrival order.
// =============================================================================

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimits;
use crate::error::{GatewayError, GatewayResult};

/// Request classes with independent ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    /// Public REST reads (status, ticker, klines, symbols).
    PublicGet,
    /// Private REST reads (account, positions, orders, executions).
    PrivateGet,
    /// Private REST writes (orders, cancellations, ws-auth).
    PrivatePost,
    /// WebSocket subscribe / unsubscribe frames.
    WsSubscribe,
}

impl LimitClass {
    fn name(&self) -> &'static str {
        match self {
            LimitClass::PublicGet => "public-get",
            LimitClass::PrivateGet => "private-get",
            LimitClass::PrivatePost => "private-post",
            LimitClass::WsSubscribe => "ws-subscribe",
        }
    }
}

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// One continuously refilling bucket. Capacity equals `rate`, so at most one
/// second's worth of calls can burst.
struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Buckets start empty: the first second of traffic is paced exactly
    /// like every later one, so a cold start cannot exceed the ceiling
    /// inside its first sliding window.
    fn new(rate: f64) -> Self {
        Self {
            rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Wait until a token is available, then consume it. Waiters are served
    /// in FIFO order because the mutex is held across the sleep.
    async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.refill(&mut state, now);

        if state.tokens < 1.0 {
            let deficit = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(deficit / self.rate);
            tokio::time::sleep(wait).await;
            self.refill(&mut state, Instant::now());
        }

        state.tokens -= 1.0;
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

/// The single chokepoint for all outgoing broker traffic.
pub struct RateLimiter {
    public_get: TokenBucket,
    private_get: TokenBucket,
    private_post: TokenBucket,
    ws_subscribe: TokenBucket,
}

impl RateLimiter {
    pub fn new(limits: &RateLimits) -> Self {
        Self {
            // The broker documents no public ceiling; the private GET rate is
            // a safe envelope for it.
            public_get: TokenBucket::new(limits.get_per_sec),
            private_get: TokenBucket::new(limits.get_per_sec),
            private_post: TokenBucket::new(limits.post_per_sec),
            ws_subscribe: TokenBucket::new(limits.ws_sub_per_sec),
        }
    }

    fn bucket(&self, class: LimitClass) -> &TokenBucket {
        match class {
            LimitClass::PublicGet => &self.public_get,
            LimitClass::PrivateGet => &self.private_get,
            LimitClass::PrivatePost => &self.private_post,
            LimitClass::WsSubscribe => &self.ws_subscribe,
        }
    }

    /// Wait for a token of `class`, without a deadline.
    pub async fn acquire(&self, class: LimitClass) {
        self.bucket(class).acquire().await;
        trace!(class = class.name(), "rate-limit token granted");
    }

    /// Wait for a token, giving up after `deadline`. On timeout the caller
    /// receives `Cancelled` promptly and no token is consumed.
    pub async fn acquire_within(
        &self,
        class: LimitClass,
        deadline: Duration,
    ) -> GatewayResult<()> {
        tokio::time::timeout(deadline, self.acquire(class))
            .await
            .map_err(|_| GatewayError::Cancelled)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("private_get_rate", &self.private_get.rate)
            .field("private_post_rate", &self.private_post.rate)
            .field("ws_subscribe_rate", &self.ws_subscribe.rate)
            .finish()
    }
}
