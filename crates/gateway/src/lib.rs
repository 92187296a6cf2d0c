//! HTTP gateway for Roost.
//!
//! Every request flows through one middleware pipeline: CORS, request log,
//! error boundary, global and per-endpoint rate limiting, bearer auth, role
//! guard, then the route stages. Axum provides the server itself; a single
//! fallback handler converts each incoming request into a pipeline context
//! and the pipeline's response back into HTTP.

pub mod auth;
pub mod context;
pub mod cors;
pub mod endpoint_limits;
pub mod error_handler;
pub mod pipeline;
pub mod rate_limit;
pub mod request_log;
pub mod routes;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use roost_config::AppConfig;
use roost_core::{SharedClock, SystemClock};
use roost_providers::{
    FallbackManager, HealthTracker, LocalSlots, ModelRouter, ProviderRegistry, SlotConfig,
    ollama_vram_probe,
};
use roost_security::{ApiKeyStore, bootstrap_env_key};
use tracing::info;

use crate::auth::{AuthStage, RoleGuardStage};
use crate::context::{HttpResponse, MiddlewareContext, RequestContext};
use crate::cors::CorsStage;
use crate::endpoint_limits::{EndpointRateLimitStage, EndpointRateLimiter, EndpointRule};
use crate::error_handler::ErrorHandlerStage;
use crate::pipeline::Pipeline;
use crate::rate_limit::{GlobalRateLimitStage, SWEEP_INTERVAL, SlidingWindowLimiter};
use crate::request_log::RequestLogStage;
use crate::routes::{AgentCardRoute, CompleteRoute, HealthRoute, ModelsRoute};

/// The assembled gateway: pipeline plus the shared limiters.
pub struct GatewayApp {
    pub pipeline: Pipeline,
    pub global_limiter: Arc<SlidingWindowLimiter>,
    pub endpoint_limiter: Arc<EndpointRateLimiter>,
    pub max_payload_bytes: usize,
}

/// Built-in per-endpoint rules. First match wins.
fn default_endpoint_rules() -> Vec<EndpointRule> {
    vec![
        EndpointRule::new("POST /api/complete")
            .public(10)
            .user(60)
            .admin(600),
        EndpointRule::new("* /api/admin/*").admin(120),
    ]
}

/// Assemble the pipeline and limiters from configuration.
pub fn build_app(
    config: &AppConfig,
    clock: SharedClock,
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
) -> GatewayApp {
    let global_limiter = Arc::new(SlidingWindowLimiter::new(
        clock.clone(),
        config.rate_limit.max_get,
        config.rate_limit.max_mutation,
        config.rate_limit.window_ms,
    ));
    let endpoint_limiter = Arc::new(EndpointRateLimiter::new(
        clock.clone(),
        config.rate_limit.window_ms,
        default_endpoint_rules(),
        config.rate_limit.max_get,
        config.rate_limit.max_mutation,
    ));

    let key_store = config
        .auth
        .api_key
        .as_deref()
        .map(|k| Arc::new(ApiKeyStore::new(k)));
    let admin_store = config
        .auth
        .admin_api_key
        .as_deref()
        .map(|k| Arc::new(ApiKeyStore::new(k)));

    let router = Arc::new(ModelRouter::new(registry.clone(), health.clone()));
    let fallback = Arc::new(FallbackManager::new(registry.clone(), health));

    let mut pipeline = Pipeline::new();
    pipeline.use_stage(Arc::new(CorsStage::new(config.auth.allowed_origins.clone())));
    pipeline.use_stage(Arc::new(RequestLogStage));
    pipeline.use_stage(Arc::new(ErrorHandlerStage));
    pipeline.use_stage(Arc::new(GlobalRateLimitStage::new(
        global_limiter.clone(),
        config.rate_limit.exempt_paths.clone(),
    )));
    pipeline.use_stage(Arc::new(AuthStage::new(key_store, admin_store, clock)));
    pipeline.use_stage(Arc::new(EndpointRateLimitStage::new(
        endpoint_limiter.clone(),
        config.rate_limit.exempt_paths.clone(),
    )));
    pipeline.use_stage(Arc::new(RoleGuardStage::default()));
    pipeline.use_stage(Arc::new(HealthRoute));
    pipeline.use_stage(Arc::new(AgentCardRoute));
    pipeline.use_stage(Arc::new(ModelsRoute::new(registry)));
    pipeline.use_stage(Arc::new(CompleteRoute::new(router, fallback)));

    GatewayApp {
        pipeline,
        global_limiter,
        endpoint_limiter,
        max_payload_bytes: config.server.max_payload_bytes,
    }
}

impl GatewayApp {
    /// Spawn the periodic stale-bucket sweep for both limiters. The task
    /// never keeps the process alive; abort the handle on shutdown.
    pub fn start_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let app = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick sweeps empty maps.
            loop {
                ticker.tick().await;
                app.global_limiter.sweep();
                app.endpoint_limiter.sweep();
            }
        })
    }
}

/// Build the axum router around the pipeline.
pub fn build_router(app: Arc<GatewayApp>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(app)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// The single axum handler: request → pipeline context → response.
async fn dispatch(State(app): State<Arc<GatewayApp>>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();

    // Reject oversized payloads up front on the declared length.
    if let Some(declared) = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if declared > app.max_payload_bytes {
            return error_response(413, "Payload too large");
        }
    }

    let body_bytes = match axum::body::to_bytes(body, app.max_payload_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return error_response(413, "Payload too large"),
    };

    let mut request = RequestContext::new(parts.method.as_str(), parts.uri.path());
    request.body = body_bytes.to_vec();

    if let Some(raw_query) = parts.uri.query() {
        request.query = parse_query(raw_query);
    }
    for (name, value) in &parts.headers {
        if let Ok(v) = value.to_str() {
            request
                .headers
                .insert(name.as_str().to_lowercase(), v.to_string());
        }
    }

    request.client_ip = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());
    request.wallet_key = request.header("x-wallet-address").map(str::to_string);

    let mut ctx = MiddlewareContext::new(request);
    app.pipeline.execute(&mut ctx).await;

    match ctx.response {
        Some(response) => to_axum_response(response),
        None => error_response(404, "Not found"),
    }
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if k.is_empty() {
                None
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect()
}

fn to_axum_response(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let result = if response.body.is_null() {
        builder.body(Body::empty())
    } else {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(response.body.to_string()))
    };
    result.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(status: u16, message: &str) -> Response {
    to_axum_response(HttpResponse::error(status, message))
}

/// Start the gateway HTTP server.
pub async fn serve(mut config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Non-localhost binds must have a key, generating one if needed.
    if let Some(generated) = bootstrap_env_key(
        Path::new(".env"),
        config.is_localhost_bind(),
        config.auth.api_key.as_deref(),
    )? {
        config.auth.api_key = Some(generated);
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let slots = LocalSlots::new(
        SlotConfig::from_ollama(&config.ollama),
        Some(ollama_vram_probe(
            config.ollama.host.clone(),
            Duration::from_secs(10),
        )),
    );
    let registry = Arc::new(ProviderRegistry::from_config(&config, slots));
    let health = Arc::new(HealthTracker::new(clock.clone()));

    let app = Arc::new(build_app(&config, clock, registry, health));
    let sweeper = app.clone().start_sweeper();

    let addr = format!("{}:{}", config.server.bind_host, config.server.port);
    let router = build_router(app);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    sweeper.abort();
    result?;
    Ok(())
}
