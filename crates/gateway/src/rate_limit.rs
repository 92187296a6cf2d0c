//! Global sliding-window rate limiter.
//!
//! Each client key holds two buckets, `read` (GET/HEAD/OPTIONS) and
//! `mutation` (POST/PUT/DELETE), each a sorted list of request timestamps
//! inside the window. Timestamps expire lazily on every check; a background
//! sweep drops buckets that have gone quiet so the map cannot grow without
//! bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use roost_core::SharedClock;
use roost_core::error::GatewayError;
use tracing::{debug, warn};

use crate::context::{HttpResponse, MiddlewareContext};
use crate::pipeline::{Middleware, Next, order};

/// How often the stale-bucket sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Rate-limit headers attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds when the window rolls over.
    pub reset_secs: i64,
}

impl RateHeaders {
    /// Apply as X-RateLimit-* headers.
    pub fn apply(&self, response: &mut HttpResponse) {
        response.set_header("X-RateLimit-Limit", self.limit.to_string());
        response.set_header("X-RateLimit-Remaining", self.remaining.to_string());
        response.set_header("X-RateLimit-Reset", self.reset_secs.to_string());
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone)]
pub enum RateDecision {
    Allowed(RateHeaders),
    Limited {
        retry_after_secs: i64,
        headers: RateHeaders,
    },
}

/// Two-bucket sliding-window limiter keyed by client identity.
pub struct SlidingWindowLimiter {
    clock: SharedClock,
    max_get: u32,
    max_mutation: u32,
    window_ms: i64,
    buckets: Mutex<HashMap<(String, &'static str), Vec<i64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(clock: SharedClock, max_get: u32, max_mutation: u32, window_ms: i64) -> Self {
        Self {
            clock,
            max_get,
            max_mutation,
            window_ms,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record one request for `client_key`.
    pub fn check(&self, client_key: &str, is_read: bool) -> RateDecision {
        let now = self.clock.now_ms();
        let (discriminator, max) = if is_read {
            ("read", self.max_get)
        } else {
            ("mutation", self.max_mutation)
        };

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets
            .entry((client_key.to_string(), discriminator))
            .or_default();

        // Timestamps are appended in order; expired ones sit at the head.
        let cutoff = now - self.window_ms;
        let live_from = bucket.partition_point(|&t| t <= cutoff);
        bucket.drain(..live_from);

        let used = bucket.len() as u32;
        let window_start = bucket.first().copied().unwrap_or(now);
        let reset_secs = (window_start + self.window_ms) / 1000;

        if used >= max {
            let oldest = bucket.first().copied().unwrap_or(now);
            let retry_after_secs = ((oldest + self.window_ms - now) + 999) / 1000;
            return RateDecision::Limited {
                retry_after_secs: retry_after_secs.max(1),
                headers: RateHeaders {
                    limit: max,
                    remaining: 0,
                    reset_secs,
                },
            };
        }

        bucket.push(now);
        RateDecision::Allowed(RateHeaders {
            limit: max,
            remaining: max - used - 1,
            reset_secs: (bucket.first().copied().unwrap_or(now) + self.window_ms) / 1000,
        })
    }

    /// Drop buckets with no activity inside the window.
    pub fn sweep(&self) {
        let cutoff = self.clock.now_ms() - self.window_ms;
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();
        buckets.retain(|_, timestamps| timestamps.last().is_some_and(|&t| t > cutoff));
        let dropped = before - buckets.len();
        if dropped > 0 {
            debug!(dropped, "Swept stale rate-limit buckets");
        }
    }

    /// Number of live buckets. Test and diagnostics support.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Pipeline stage applying the global limiter.
pub struct GlobalRateLimitStage {
    limiter: Arc<SlidingWindowLimiter>,
    exempt_paths: Vec<String>,
}

impl GlobalRateLimitStage {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, exempt_paths: Vec<String>) -> Self {
        Self {
            limiter,
            exempt_paths,
        }
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
    }
}

#[async_trait]
impl Middleware for GlobalRateLimitStage {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn order(&self) -> i32 {
        order::RATE_LIMIT
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if self.is_exempt(&ctx.request.path) {
            return next.run(ctx).await;
        }

        let key = ctx.request.client_key();
        match self.limiter.check(&key, ctx.request.is_read()) {
            RateDecision::Limited {
                retry_after_secs,
                headers,
            } => {
                warn!(
                    client = %key,
                    path = %ctx.request.path,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                let mut response = HttpResponse::error(429, "Rate limit exceeded");
                headers.apply(&mut response);
                response.set_header("Retry-After", retry_after_secs.to_string());
                ctx.respond_and_abort(response);
                Ok(())
            }
            RateDecision::Allowed(headers) => {
                next.run(ctx).await?;
                if let Some(response) = ctx.response.as_mut() {
                    headers.apply(response);
                }
                Ok(())
            }
        }
    }
}
