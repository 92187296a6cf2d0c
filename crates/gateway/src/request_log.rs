//! Request logging stage.
//!
//! Starts a timer on the way down, emits one structured line with status and
//! duration on the way back up.

use async_trait::async_trait;
use roost_core::error::GatewayError;
use tracing::info;

use crate::context::MiddlewareContext;
use crate::pipeline::{Middleware, Next, order};

pub struct RequestLogStage;

#[async_trait]
impl Middleware for RequestLogStage {
    fn name(&self) -> &'static str {
        "request-log"
    }

    fn order(&self) -> i32 {
        order::REQUEST_LOG
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        next.run(ctx).await?;

        let status = ctx.response.as_ref().map_or(404, |r| r.status);
        info!(
            method = %ctx.request.method,
            path = %ctx.request.path,
            status,
            duration_ms = ctx.started_at.elapsed().as_millis() as u64,
            request_id = %ctx.request_id,
            "Request handled"
        );
        Ok(())
    }
}
