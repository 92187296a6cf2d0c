//! Route handlers, expressed as pipeline stages in the 200+ order band.
//!
//! Each stage claims its method/path pair and passes everything else down
//! the stack untouched; a request nothing claims leaves the pipeline with
//! no response and the HTTP adapter turns that into a 404.

use std::sync::Arc;

use async_trait::async_trait;
use roost_core::error::{GatewayError, ProviderError};
use roost_core::{CompletionRequest, Message, ProviderKind};
use roost_providers::{FallbackManager, ModelRouter, ProviderRegistry, RouteOptions};
use serde::Deserialize;
use serde_json::json;

use crate::context::{HttpResponse, MiddlewareContext};
use crate::pipeline::{Middleware, Next, order};

/// GET /api/health
pub struct HealthRoute;

#[async_trait]
impl Middleware for HealthRoute {
    fn name(&self) -> &'static str {
        "route-health"
    }

    fn order(&self) -> i32 {
        order::ROUTES
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if ctx.request.method != "GET" || ctx.request.path != "/api/health" {
            return next.run(ctx).await;
        }
        ctx.response = Some(HttpResponse::json(
            200,
            json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ));
        Ok(())
    }
}

/// GET /.well-known/agent-card.json
pub struct AgentCardRoute;

#[async_trait]
impl Middleware for AgentCardRoute {
    fn name(&self) -> &'static str {
        "route-agent-card"
    }

    fn order(&self) -> i32 {
        order::ROUTES
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if ctx.request.method != "GET" || ctx.request.path != "/.well-known/agent-card.json" {
            return next.run(ctx).await;
        }
        ctx.response = Some(HttpResponse::json(
            200,
            json!({
                "name": "roost",
                "description": "Agent orchestration server",
                "version": env!("CARGO_PKG_VERSION"),
                "endpoints": { "complete": "/api/complete", "models": "/api/models" },
            }),
        ));
        Ok(())
    }
}

/// GET /api/models — the catalog restricted to registered providers.
pub struct ModelsRoute {
    registry: Arc<ProviderRegistry>,
}

impl ModelsRoute {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Middleware for ModelsRoute {
    fn name(&self) -> &'static str {
        "route-models"
    }

    fn order(&self) -> i32 {
        order::ROUTES
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if ctx.request.method != "GET" || ctx.request.path != "/api/models" {
            return next.run(ctx).await;
        }

        let models: Vec<_> = roost_telemetry::catalog()
            .iter()
            .filter(|m| self.registry.contains(m.provider))
            .map(|m| {
                json!({
                    "id": m.id,
                    "provider": m.provider,
                    "display_name": m.display_name,
                    "tier": m.tier,
                    "input_per_m": m.input_per_m,
                    "output_per_m": m.output_per_m,
                    "supports_tools": m.supports_tools,
                    "supports_thinking": m.supports_thinking,
                })
            })
            .collect();

        ctx.response = Some(HttpResponse::json(
            200,
            json!({ "models": models, "local_only": self.registry.local_only() }),
        ));
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CompleteBody {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    messages: Option<Vec<Message>>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    preferred_provider: Option<String>,
    #[serde(default)]
    max_output_price: Option<f64>,
    #[serde(default)]
    require_subagents: bool,
    #[serde(default)]
    require_web_search: bool,
    #[serde(default)]
    prefer_cloud: bool,
}

/// POST /api/complete — the completion API.
///
/// Classifies the prompt, selects a model, and dispatches through the
/// fallback chain for the estimated complexity.
pub struct CompleteRoute {
    router: Arc<ModelRouter>,
    fallback: Arc<FallbackManager>,
}

impl CompleteRoute {
    pub fn new(router: Arc<ModelRouter>, fallback: Arc<FallbackManager>) -> Self {
        Self { router, fallback }
    }
}

#[async_trait]
impl Middleware for CompleteRoute {
    fn name(&self) -> &'static str {
        "route-complete"
    }

    fn order(&self) -> i32 {
        order::ROUTES
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        if ctx.request.method != "POST" || ctx.request.path != "/api/complete" {
            return next.run(ctx).await;
        }

        let body: CompleteBody = match serde_json::from_slice(&ctx.request.body) {
            Ok(body) => body,
            Err(e) => {
                ctx.respond_and_abort(HttpResponse::error(400, format!("Invalid JSON body: {e}")));
                return Ok(());
            }
        };

        let messages = match (&body.prompt, body.messages) {
            (_, Some(messages)) if !messages.is_empty() => messages,
            (Some(prompt), _) if !prompt.trim().is_empty() => vec![Message::user(prompt.as_str())],
            _ => {
                ctx.respond_and_abort(HttpResponse::error(
                    400,
                    "Request needs a prompt or a non-empty messages array",
                ));
                return Ok(());
            }
        };

        // The classifier sees the latest user text.
        let prompt_text = body.prompt.clone().unwrap_or_else(|| {
            messages
                .iter()
                .rev()
                .find(|m| m.role == roost_core::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        });

        let options = RouteOptions {
            require_subagents: body.require_subagents,
            require_web_search: body.require_web_search,
            max_output_price: body.max_output_price,
            preferred_provider: body.preferred_provider.as_deref().and_then(ProviderKind::parse),
            prefer_cloud: body.prefer_cloud,
        };

        let Some(selected) = self.router.select_model(&prompt_text, &options) else {
            ctx.respond_and_abort(HttpResponse::error(503, "No providers registered"));
            return Ok(());
        };

        let mut request = CompletionRequest::new(selected.entry.id, messages);
        if let Some(t) = body.temperature {
            request.temperature = t;
        }
        request.max_tokens = body.max_tokens;
        request.allow_thinking =
            selected.estimate.signals.requires_thinking && selected.entry.supports_thinking;

        let chain = self
            .router
            .chain_for_complexity(selected.estimate.level, &options)
            .entries();

        match self.fallback.complete_with_fallback(request, &chain).await {
            Ok(response) => {
                let estimated_cost = response
                    .used_model
                    .as_deref()
                    .zip(response.usage.as_ref())
                    .map(|(model, usage)| {
                        roost_telemetry::estimate_cost(
                            model,
                            usage.prompt_tokens,
                            usage.completion_tokens,
                        )
                    })
                    .unwrap_or(0.0);

                ctx.response = Some(HttpResponse::json(
                    200,
                    json!({
                        "content": response.content,
                        "tool_calls": response.tool_calls,
                        "model": response.model,
                        "used_provider": response.used_provider,
                        "used_model": response.used_model,
                        "usage": response.usage,
                        "complexity": selected.estimate.level,
                        "estimated_cost": estimated_cost,
                    }),
                ));
                Ok(())
            }
            Err(ProviderError::InvalidRequest(msg)) => {
                ctx.respond_and_abort(HttpResponse::error(400, msg));
                Ok(())
            }
            Err(e) => {
                ctx.respond_and_abort(HttpResponse::error(503, e.to_string()));
                Ok(())
            }
        }
    }
}
