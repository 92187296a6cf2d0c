//! Error boundary stage.
//!
//! Catches anything the downstream stack lets escape. Typed gateway errors
//! map to their status codes; internal ones get the generic 500 envelope.
//! A response a stage already wrote is never overwritten.

use async_trait::async_trait;
use roost_core::error::GatewayError;
use tracing::error;

use crate::context::{HttpResponse, MiddlewareContext};
use crate::pipeline::{Middleware, Next, internal_error_response, order};

pub struct ErrorHandlerStage;

#[async_trait]
impl Middleware for ErrorHandlerStage {
    fn name(&self) -> &'static str {
        "error-handler"
    }

    fn order(&self) -> i32 {
        order::ERROR_HANDLER
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        let Err(e) = next.run(ctx).await else {
            return Ok(());
        };

        error!(
            path = %ctx.request.path,
            method = %ctx.request.method,
            request_id = %ctx.request_id,
            error = %e,
            "Unhandled error in request pipeline"
        );

        if ctx.response.is_none() {
            ctx.response = Some(match &e {
                GatewayError::Internal(_) => internal_error_response(),
                other => HttpResponse::error(other.status_code(), other.to_string()),
            });
        }
        Ok(())
    }
}
