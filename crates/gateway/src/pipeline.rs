//! The request pipeline — an ordered onion of middleware stages.
//!
//! Stages run downstream in ascending `order` (ties keep registration
//! order), then unwind upstream in strict reverse as each `handle` call
//! returns. A stage continues the chain by consuming its [`Next`]; dropping
//! it instead halts downstream traversal while the already-entered stages
//! still unwind. Setting `ctx.aborted` has the same effect even if `Next`
//! is consumed afterwards.
//!
//! `Next` is taken by value, so a stage cannot invoke its continuation
//! twice; the double-call failure mode is unrepresentable.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use roost_core::error::GatewayError;
use tracing::error;

use crate::context::{HttpResponse, MiddlewareContext};

/// Reserved order bands for the built-in stages.
pub mod order {
    pub const CORS: i32 = 10;
    pub const REQUEST_LOG: i32 = 20;
    pub const ERROR_HANDLER: i32 = 30;
    pub const RATE_LIMIT: i32 = 100;
    pub const AUTH: i32 = 110;
    pub const ENDPOINT_RATE_LIMIT: i32 = 115;
    pub const ROLE: i32 = 120;
    pub const ROUTES: i32 = 200;
}

/// One stage of the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name, used for removal and logs.
    fn name(&self) -> &'static str;

    /// Position in the stack; lower runs first.
    fn order(&self) -> i32;

    /// Inspect/mutate the context, then consume `next` to continue
    /// downstream. Code after the `next.run(ctx).await` is the upstream
    /// phase.
    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError>;
}

/// The continuation of the stack below the current stage.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    /// Run the rest of the stack against `ctx`.
    pub async fn run(self, ctx: &mut MiddlewareContext) -> Result<(), GatewayError> {
        if ctx.aborted {
            return Ok(());
        }
        match self.stack.split_first() {
            Some((head, rest)) => head.handle(ctx, Next { stack: rest }).await,
            None => Ok(()),
        }
    }
}

/// An ordered, mutable stack of stages with a cached composition.
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
    compiled: RwLock<Option<Arc<[Arc<dyn Middleware>]>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            compiled: RwLock::new(None),
        }
    }

    /// Register a stage. Invalidates the cached composition.
    pub fn use_stage(&mut self, stage: Arc<dyn Middleware>) {
        self.stages.push(stage);
        *self.compiled.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Remove all stages with the given name. Returns whether any matched.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|s| s.name() != name);
        let removed = self.stages.len() != before;
        if removed {
            *self.compiled.write().unwrap_or_else(|e| e.into_inner()) = None;
        }
        removed
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The composed stack, stable-sorted by order.
    fn compose(&self) -> Arc<[Arc<dyn Middleware>]> {
        if let Some(cached) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return cached;
        }

        let mut sorted = self.stages.clone();
        sorted.sort_by_key(|s| s.order());
        let composed: Arc<[Arc<dyn Middleware>]> = sorted.into();

        *self.compiled.write().unwrap_or_else(|e| e.into_inner()) = Some(composed.clone());
        composed
    }

    /// Run the pipeline. Any failure that escapes every stage is logged,
    /// and a 500 is synthesized if no stage produced a response.
    pub async fn execute(&self, ctx: &mut MiddlewareContext) {
        let stages = self.compose();
        if let Err(e) = (Next { stack: &stages[..] }).run(ctx).await {
            error!(
                path = %ctx.request.path,
                request_id = %ctx.request_id,
                error = %e,
                "Pipeline failed with no error handler in the stack"
            );
            if ctx.response.is_none() {
                ctx.response = Some(internal_error_response());
            }
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// The generic 500 body. Never leaks error details to the caller.
pub fn internal_error_response() -> HttpResponse {
    HttpResponse::json(
        500,
        serde_json::json!({
            "error": "Internal server error",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )
}
