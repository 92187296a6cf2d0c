//! Per-endpoint tiered rate limiter.
//!
//! Rules are a first-match-wins list. A rule matches `"METHOD /path"` where
//! the method may be `*` and a path ending in `/*` is a prefix match. Each
//! rule carries optional limits per tier (public / user / admin); a missing
//! tier limit means the rule does not constrain that tier. Requests no rule
//! matches fall back to default limits bucketed by read-vs-mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use roost_core::SharedClock;
use roost_core::error::GatewayError;
use tracing::warn;

use crate::context::{AuthRole, HttpResponse, MiddlewareContext};
use crate::pipeline::{Middleware, Next, order};
use crate::rate_limit::{RateDecision, RateHeaders};

/// The tier a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Public,
    User,
    Admin,
}

impl Tier {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Tier of a request: admin when authenticated with the admin role,
    /// user when authenticated, public otherwise.
    pub fn of(authenticated: bool, role: Option<AuthRole>) -> Self {
        match (authenticated, role) {
            (true, Some(AuthRole::Admin)) => Self::Admin,
            (true, _) => Self::User,
            (false, _) => Self::Public,
        }
    }
}

/// One endpoint rule.
#[derive(Debug, Clone)]
pub struct EndpointRule {
    /// `"METHOD /path"`; method `*` matches all, trailing `/*` is a prefix.
    pub pattern: String,
    pub public_limit: Option<u32>,
    pub user_limit: Option<u32>,
    pub admin_limit: Option<u32>,
}

impl EndpointRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            public_limit: None,
            user_limit: None,
            admin_limit: None,
        }
    }

    pub fn public(mut self, limit: u32) -> Self {
        self.public_limit = Some(limit);
        self
    }

    pub fn user(mut self, limit: u32) -> Self {
        self.user_limit = Some(limit);
        self
    }

    pub fn admin(mut self, limit: u32) -> Self {
        self.admin_limit = Some(limit);
        self
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        let Some((rule_method, rule_path)) = self.pattern.split_once(' ') else {
            return false;
        };
        if rule_method != "*" && !rule_method.eq_ignore_ascii_case(method) {
            return false;
        }
        match rule_path.strip_suffix("/*") {
            Some(prefix) => path.starts_with(prefix),
            None => path == rule_path,
        }
    }

    fn limit_for(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Public => self.public_limit,
            Tier::User => self.user_limit,
            Tier::Admin => self.admin_limit,
        }
    }
}

/// Sliding-window limiter bucketed by (client, rule-or-default, tier).
pub struct EndpointRateLimiter {
    clock: SharedClock,
    window_ms: i64,
    rules: Vec<EndpointRule>,
    default_get: u32,
    default_mutation: u32,
    buckets: Mutex<HashMap<(String, String), Vec<i64>>>,
}

impl EndpointRateLimiter {
    pub fn new(
        clock: SharedClock,
        window_ms: i64,
        rules: Vec<EndpointRule>,
        default_get: u32,
        default_mutation: u32,
    ) -> Self {
        Self {
            clock,
            window_ms,
            rules,
            default_get,
            default_mutation,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record a request. Returns None when no limit applies.
    pub fn check(
        &self,
        client_key: &str,
        method: &str,
        path: &str,
        tier: Tier,
        is_read: bool,
    ) -> Option<RateDecision> {
        let (discriminator, max) = match self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(method, path))
        {
            Some((index, rule)) => {
                let max = rule.limit_for(tier)?;
                (format!("{index}:{}", tier.as_str()), max)
            }
            None => {
                let (kind, max) = if is_read {
                    ("read", self.default_get)
                } else {
                    ("mutation", self.default_mutation)
                };
                (format!("default:{kind}:{}", tier.as_str()), max)
            }
        };

        let now = self.clock.now_ms();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets
            .entry((client_key.to_string(), discriminator))
            .or_default();

        let cutoff = now - self.window_ms;
        let live_from = bucket.partition_point(|&t| t <= cutoff);
        bucket.drain(..live_from);

        let used = bucket.len() as u32;
        let window_start = bucket.first().copied().unwrap_or(now);
        let reset_secs = (window_start + self.window_ms) / 1000;

        if used >= max {
            let oldest = bucket.first().copied().unwrap_or(now);
            let retry_after_secs = (((oldest + self.window_ms - now) + 999) / 1000).max(1);
            return Some(RateDecision::Limited {
                retry_after_secs,
                headers: RateHeaders {
                    limit: max,
                    remaining: 0,
                    reset_secs,
                },
            });
        }

        bucket.push(now);
        Some(RateDecision::Allowed(RateHeaders {
            limit: max,
            remaining: max - used - 1,
            reset_secs: (bucket.first().copied().unwrap_or(now) + self.window_ms) / 1000,
        }))
    }

    /// Drop buckets with no activity inside the window.
    pub fn sweep(&self) {
        let cutoff = self.clock.now_ms() - self.window_ms;
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.retain(|_, timestamps| timestamps.last().is_some_and(|&t| t > cutoff));
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Pipeline stage applying the endpoint limiter. Runs after auth so the
/// request's tier is known.
pub struct EndpointRateLimitStage {
    limiter: Arc<EndpointRateLimiter>,
    exempt_paths: Vec<String>,
}

impl EndpointRateLimitStage {
    pub fn new(limiter: Arc<EndpointRateLimiter>, exempt_paths: Vec<String>) -> Self {
        Self {
            limiter,
            exempt_paths,
        }
    }
}

#[async_trait]
impl Middleware for EndpointRateLimitStage {
    fn name(&self) -> &'static str {
        "endpoint-rate-limit"
    }

    fn order(&self) -> i32 {
        order::ENDPOINT_RATE_LIMIT
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if self.exempt_paths.iter().any(|p| p == &ctx.request.path) {
            return next.run(ctx).await;
        }

        let tier = Tier::of(ctx.request.authenticated, ctx.request.role);
        let decision = self.limiter.check(
            &ctx.request.client_key(),
            &ctx.request.method,
            &ctx.request.path,
            tier,
            ctx.request.is_read(),
        );

        match decision {
            None => next.run(ctx).await,
            Some(RateDecision::Limited {
                retry_after_secs,
                headers,
            }) => {
                warn!(
                    client = %ctx.request.client_key(),
                    path = %ctx.request.path,
                    tier = tier.as_str(),
                    "Endpoint rate limit exceeded"
                );
                let mut response = HttpResponse::error(429, "Rate limit exceeded");
                headers.apply(&mut response);
                response.set_header("Retry-After", retry_after_secs.to_string());
                ctx.respond_and_abort(response);
                Ok(())
            }
            Some(RateDecision::Allowed(headers)) => {
                next.run(ctx).await?;
                if let Some(response) = ctx.response.as_mut() {
                    headers.apply(response);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::ManualClock;

    fn limiter_with(rules: Vec<EndpointRule>) -> (EndpointRateLimiter, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (
            EndpointRateLimiter::new(Arc::new(clock.clone()), 60_000, rules, 100, 50),
            clock,
        )
    }

    #[test]
    fn pattern_matching() {
        let exact = EndpointRule::new("POST /api/complete");
        assert!(exact.matches("POST", "/api/complete"));
        assert!(exact.matches("post", "/api/complete"));
        assert!(!exact.matches("GET", "/api/complete"));
        assert!(!exact.matches("POST", "/api/complete/x"));

        let wildcard_method = EndpointRule::new("* /api/health");
        assert!(wildcard_method.matches("GET", "/api/health"));
        assert!(wildcard_method.matches("DELETE", "/api/health"));

        let prefix = EndpointRule::new("GET /api/admin/*");
        assert!(prefix.matches("GET", "/api/admin/audit"));
        assert!(prefix.matches("GET", "/api/admin/"));
        assert!(!prefix.matches("GET", "/api/other"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let (limiter, _) = limiter_with(vec![
            EndpointRule::new("POST /api/complete").public(1),
            EndpointRule::new("* /api/*").public(99),
        ]);

        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::Public, false),
            Some(RateDecision::Allowed(h)) if h.limit == 1
        ));
        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::Public, false),
            Some(RateDecision::Limited { .. })
        ));
        // A different endpoint lands on the broader rule.
        assert!(matches!(
            limiter.check("c", "POST", "/api/other", Tier::Public, false),
            Some(RateDecision::Allowed(h)) if h.limit == 99
        ));
    }

    #[test]
    fn tiers_have_separate_budgets() {
        let (limiter, _) = limiter_with(vec![
            EndpointRule::new("POST /api/complete")
                .public(1)
                .user(2)
                .admin(3),
        ]);

        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::Public, false),
            Some(RateDecision::Allowed(_))
        ));
        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::Public, false),
            Some(RateDecision::Limited { .. })
        ));

        // Same client on the user tier has its own bucket and higher cap.
        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::User, false),
            Some(RateDecision::Allowed(_))
        ));
        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::User, false),
            Some(RateDecision::Allowed(_))
        ));
        assert!(matches!(
            limiter.check("c", "POST", "/api/complete", Tier::User, false),
            Some(RateDecision::Limited { .. })
        ));
    }

    #[test]
    fn missing_tier_limit_means_unconstrained() {
        let (limiter, _) = limiter_with(vec![EndpointRule::new("POST /api/complete").public(1)]);
        assert!(
            limiter
                .check("c", "POST", "/api/complete", Tier::Admin, false)
                .is_none()
        );
    }

    #[test]
    fn unmatched_requests_use_default_buckets() {
        let (limiter, _) = limiter_with(vec![]);
        match limiter.check("c", "GET", "/api/anything", Tier::Public, true) {
            Some(RateDecision::Allowed(h)) => assert_eq!(h.limit, 100),
            other => panic!("expected allowed, got {other:?}"),
        }
        match limiter.check("c", "POST", "/api/anything", Tier::Public, false) {
            Some(RateDecision::Allowed(h)) => assert_eq!(h.limit, 50),
            other => panic!("expected allowed, got {other:?}"),
        }
    }

    #[test]
    fn tier_derivation() {
        assert_eq!(Tier::of(false, None), Tier::Public);
        assert_eq!(Tier::of(true, Some(AuthRole::User)), Tier::User);
        assert_eq!(Tier::of(true, None), Tier::User);
        assert_eq!(Tier::of(true, Some(AuthRole::Admin)), Tier::Admin);
        // Role without authentication counts for nothing.
        assert_eq!(Tier::of(false, Some(AuthRole::Admin)), Tier::Public);
    }

    #[test]
    fn window_expiry_applies() {
        let (limiter, clock) = limiter_with(vec![EndpointRule::new("GET /x").public(1)]);
        assert!(matches!(
            limiter.check("c", "GET", "/x", Tier::Public, true),
            Some(RateDecision::Allowed(_))
        ));
        assert!(matches!(
            limiter.check("c", "GET", "/x", Tier::Public, true),
            Some(RateDecision::Limited { .. })
        ));
        clock.advance(60_001);
        assert!(matches!(
            limiter.check("c", "GET", "/x", Tier::Public, true),
            Some(RateDecision::Allowed(_))
        ));
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 1);
    }
}
