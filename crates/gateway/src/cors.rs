//! CORS stage.
//!
//! Preflight requests are answered 204 and never travel further down the
//! stack. For everything else the headers are attached on the upstream
//! phase, so whatever response a later stage wrote gets them too.
//!
//! Policy: with no allow-list every origin gets `*`; with an allow-list a
//! matching Origin is echoed back with `Vary: Origin`, and a non-matching
//! one gets an empty allow-origin, which browsers treat as a block.

use async_trait::async_trait;
use roost_core::error::GatewayError;

use crate::context::{HttpResponse, MiddlewareContext};
use crate::pipeline::{Middleware, Next, order};

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";

pub struct CorsStage {
    allowed_origins: Vec<String>,
}

impl CorsStage {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    /// Headers for a request carrying `origin`, per the allow-list policy.
    fn cors_headers(&self, origin: Option<&str>) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        if self.allowed_origins.is_empty() {
            headers.push(("Access-Control-Allow-Origin".into(), "*".into()));
        } else {
            match origin {
                Some(o) if self.allowed_origins.iter().any(|a| a == o) => {
                    headers.push(("Access-Control-Allow-Origin".into(), o.to_string()));
                    headers.push(("Vary".into(), "Origin".into()));
                }
                _ => {
                    headers.push(("Access-Control-Allow-Origin".into(), String::new()));
                }
            }
        }

        headers.push(("Access-Control-Allow-Methods".into(), ALLOW_METHODS.into()));
        headers.push(("Access-Control-Allow-Headers".into(), ALLOW_HEADERS.into()));
        headers
    }

    fn apply(&self, response: &mut HttpResponse, origin: Option<&str>) {
        for (name, value) in self.cors_headers(origin) {
            response.set_header(name, value);
        }
    }
}

#[async_trait]
impl Middleware for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn order(&self) -> i32 {
        order::CORS
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), GatewayError> {
        let origin = ctx.request.header("origin").map(str::to_string);

        if ctx.request.method == "OPTIONS" {
            let mut response = HttpResponse::status(204);
            self.apply(&mut response, origin.as_deref());
            ctx.respond_and_abort(response);
            return Ok(());
        }

        next.run(ctx).await?;

        if let Some(response) = ctx.response.as_mut() {
            self.apply(response, origin.as_deref());
        }
        Ok(())
    }
}
