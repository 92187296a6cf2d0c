//! Authentication and role stages.
//!
//! Bearer auth with a closed public-path set. The scheme name is matched
//! case-insensitively; a missing or malformed header is 401 while a
//! well-formed but wrong key is 403. The websocket upgrade path may carry
//! the key as `?key=` since browsers cannot set headers on the upgrade.
//! With no API key configured the gateway is in localhost trust mode and
//! every request proceeds with the admin role.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use roost_core::SharedClock;
use roost_core::error::GatewayError;
use roost_security::ApiKeyStore;
use tracing::{debug, warn};

use crate::context::{AuthRole, HttpResponse, MiddlewareContext};
use crate::pipeline::{Middleware, Next, order};

/// Paths that bypass authentication entirely.
pub fn default_public_paths() -> HashSet<String> {
    [
        "/api/health",
        "/.well-known/agent-card.json",
        "/api/tenants/register",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The websocket upgrade path that may authenticate via query parameter.
const WS_PATH: &str = "/ws";

pub struct AuthStage {
    key_store: Option<Arc<ApiKeyStore>>,
    admin_store: Option<Arc<ApiKeyStore>>,
    clock: SharedClock,
    public_paths: HashSet<String>,
}

impl AuthStage {
    pub fn new(
        key_store: Option<Arc<ApiKeyStore>>,
        admin_store: Option<Arc<ApiKeyStore>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            key_store,
            admin_store,
            clock,
            public_paths: default_public_paths(),
        }
    }

    pub fn with_public_paths(mut self, paths: HashSet<String>) -> Self {
        self.public_paths = paths;
        self
    }

    /// Extract the token from `Authorization: Bearer <token>`.
    ///
    /// Returns Err(()) when the header exists but is not a well-formed
    /// bearer credential.
    fn parse_bearer(value: &str) -> Result<&str, ()> {
        let (scheme, token) = value.split_once(' ').ok_or(())?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(());
        }
        let token = token.trim();
        if token.is_empty() { Err(()) } else { Ok(token) }
    }
}

#[async_trait]
impl Middleware for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn order(&self) -> i32 {
        order::AUTH
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if ctx.request.method == "OPTIONS" || self.public_paths.contains(&ctx.request.path) {
            return next.run(ctx).await;
        }

        let Some(key_store) = &self.key_store else {
            // No key configured: localhost operation, full trust.
            ctx.request.authenticated = true;
            ctx.request.role = Some(AuthRole::Admin);
            return next.run(ctx).await;
        };

        let header_token = match ctx.request.header("authorization") {
            Some(value) => match Self::parse_bearer(value) {
                Ok(token) => Some(token.to_string()),
                Err(()) => {
                    warn!(path = %ctx.request.path, "Malformed Authorization header");
                    ctx.respond_and_abort(HttpResponse::error(
                        401,
                        "Malformed Authorization header",
                    ));
                    return Ok(());
                }
            },
            None => None,
        };

        // Browsers cannot set headers on a websocket upgrade.
        let token = header_token.or_else(|| {
            if ctx.request.path == WS_PATH {
                ctx.request.query_param("key").map(str::to_string)
            } else {
                None
            }
        });

        let Some(token) = token else {
            ctx.respond_and_abort(HttpResponse::error(401, "Authentication required"));
            return Ok(());
        };

        let now = self.clock.now_ms();
        let role = if self
            .admin_store
            .as_ref()
            .is_some_and(|s| s.validate(&token, now))
        {
            AuthRole::Admin
        } else if key_store.validate(&token, now) {
            AuthRole::User
        } else {
            debug!(path = %ctx.request.path, "API key mismatch");
            ctx.respond_and_abort(HttpResponse::error(403, "Invalid API key"));
            return Ok(());
        };

        ctx.request.authenticated = true;
        ctx.request.role = Some(role);
        next.run(ctx).await
    }
}

/// Denies elevated paths to callers without the admin role.
pub struct RoleGuardStage {
    admin_prefixes: Vec<String>,
}

impl RoleGuardStage {
    pub fn new(admin_prefixes: Vec<String>) -> Self {
        Self { admin_prefixes }
    }
}

impl Default for RoleGuardStage {
    fn default() -> Self {
        Self::new(vec!["/api/admin".into()])
    }
}

#[async_trait]
impl Middleware for RoleGuardStage {
    fn name(&self) -> &'static str {
        "role"
    }

    fn order(&self) -> i32 {
        order::ROLE
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        let elevated = self
            .admin_prefixes
            .iter()
            .any(|p| ctx.request.path.starts_with(p.as_str()));

        if elevated && ctx.request.role != Some(AuthRole::Admin) {
            warn!(path = %ctx.request.path, "Admin role required");
            ctx.respond_and_abort(HttpResponse::error(403, "Admin role required"));
            return Ok(());
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::pipeline::Pipeline;
    use roost_core::{Clock, ManualClock};

    struct MarkerRoute;

    #[async_trait]
    impl Middleware for MarkerRoute {
        fn name(&self) -> &'static str {
            "marker"
        }
        fn order(&self) -> i32 {
            order::ROUTES
        }
        async fn handle(
            &self,
            ctx: &mut MiddlewareContext,
            _next: Next<'_>,
        ) -> Result<(), GatewayError> {
            ctx.response = Some(HttpResponse::json(
                200,
                serde_json::json!({
                    "authenticated": ctx.request.authenticated,
                    "role": match ctx.request.role {
                        Some(AuthRole::Admin) => "admin",
                        Some(AuthRole::User) => "user",
                        None => "none",
                    },
                }),
            ));
            Ok(())
        }
    }

    fn pipeline_with_auth(api_key: Option<&str>, admin_key: Option<&str>) -> Pipeline {
        let clock = Arc::new(ManualClock::new(0));
        let mut pipeline = Pipeline::new();
        pipeline.use_stage(Arc::new(AuthStage::new(
            api_key.map(|k| Arc::new(ApiKeyStore::new(k))),
            admin_key.map(|k| Arc::new(ApiKeyStore::new(k))),
            clock,
        )));
        pipeline.use_stage(Arc::new(RoleGuardStage::default()));
        pipeline.use_stage(Arc::new(MarkerRoute));
        pipeline
    }

    async fn run(pipeline: &Pipeline, request: RequestContext) -> HttpResponse {
        let mut ctx = MiddlewareContext::new(request);
        pipeline.execute(&mut ctx).await;
        ctx.response.expect("pipeline must produce a response")
    }

    fn authed(path: &str, header: &str) -> RequestContext {
        let mut request = RequestContext::new("GET", path);
        request.headers.insert("authorization".into(), header.into());
        request
    }

    #[tokio::test]
    async fn no_key_configured_grants_admin() {
        let pipeline = pipeline_with_auth(None, None);
        let response = run(&pipeline, RequestContext::new("GET", "/api/anything")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["role"], "admin");
    }

    #[tokio::test]
    async fn missing_header_is_401() {
        let pipeline = pipeline_with_auth(Some("secret"), None);
        let response = run(&pipeline, RequestContext::new("GET", "/api/anything")).await;
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn malformed_header_is_401() {
        let pipeline = pipeline_with_auth(Some("secret"), None);
        for bad in ["secret", "Basic secret", "Bearer "] {
            let response = run(&pipeline, authed("/api/anything", bad)).await;
            assert_eq!(response.status, 401, "header {bad:?}");
        }
    }

    #[tokio::test]
    async fn wrong_key_is_403() {
        let pipeline = pipeline_with_auth(Some("secret"), None);
        let response = run(&pipeline, authed("/api/anything", "Bearer wrong")).await;
        assert_eq!(response.status, 403);
    }

    #[tokio::test]
    async fn valid_key_grants_user_role() {
        let pipeline = pipeline_with_auth(Some("secret"), None);
        let response = run(&pipeline, authed("/api/anything", "Bearer secret")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["role"], "user");
        assert_eq!(response.body["authenticated"], true);
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let pipeline = pipeline_with_auth(Some("secret"), None);
        for header in ["bearer secret", "BEARER secret", "BeArEr secret"] {
            let response = run(&pipeline, authed("/api/anything", header)).await;
            assert_eq!(response.status, 200, "header {header:?}");
        }
    }

    #[tokio::test]
    async fn admin_key_grants_admin_role() {
        let pipeline = pipeline_with_auth(Some("secret"), Some("admin-secret"));
        let response = run(&pipeline, authed("/api/anything", "Bearer admin-secret")).await;
        assert_eq!(response.body["role"], "admin");
    }

    #[tokio::test]
    async fn public_paths_skip_auth() {
        let pipeline = pipeline_with_auth(Some("secret"), None);
        for path in ["/api/health", "/.well-known/agent-card.json", "/api/tenants/register"] {
            let response = run(&pipeline, RequestContext::new("GET", path)).await;
            assert_eq!(response.status, 200, "path {path}");
            assert_eq!(response.body["authenticated"], false);
        }
    }

    #[tokio::test]
    async fn websocket_path_accepts_query_key() {
        let pipeline = pipeline_with_auth(Some("secret"), None);

        let mut request = RequestContext::new("GET", "/ws");
        request.query.insert("key".into(), "secret".into());
        let response = run(&pipeline, request).await;
        assert_eq!(response.status, 200);

        // Query key is only honored on the websocket path.
        let mut request = RequestContext::new("GET", "/api/anything");
        request.query.insert("key".into(), "secret".into());
        let response = run(&pipeline, request).await;
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn rotated_key_stays_valid_through_grace() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(ApiKeyStore::new("old-key"));
        let new_key = store.rotate(60_000, clock.now_ms());

        let mut pipeline = Pipeline::new();
        pipeline.use_stage(Arc::new(AuthStage::new(
            Some(store),
            None,
            clock.clone(),
        )));
        pipeline.use_stage(Arc::new(MarkerRoute));

        let response = run(&pipeline, authed("/api/x", "Bearer old-key")).await;
        assert_eq!(response.status, 200);
        let response = run(&pipeline, authed("/api/x", &format!("Bearer {new_key}"))).await;
        assert_eq!(response.status, 200);

        clock.advance(61_000);
        let response = run(&pipeline, authed("/api/x", "Bearer old-key")).await;
        assert_eq!(response.status, 403);
        let response = run(&pipeline, authed("/api/x", &format!("Bearer {new_key}"))).await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn role_guard_denies_non_admin() {
        let pipeline = pipeline_with_auth(Some("secret"), Some("admin-secret"));

        let response = run(&pipeline, authed("/api/admin/audit", "Bearer secret")).await;
        assert_eq!(response.status, 403);

        let response = run(&pipeline, authed("/api/admin/audit", "Bearer admin-secret")).await;
        assert_eq!(response.status, 200);
    }
}
