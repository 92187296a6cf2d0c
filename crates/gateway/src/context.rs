//! Per-request context shared across pipeline stages.
//!
//! `RequestContext` carries the parsed request plus everything auth and the
//! limiters decide about it; `MiddlewareContext` wraps it with the response
//! slot, scratch state, and the abort flag the dispatcher honors. Both live
//! exactly as long as one request.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

/// Tenant id used when no tenant was resolved.
pub const TENANT_DEFAULT: &str = "default";

/// The role an authenticated caller holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRole {
    Admin,
    User,
}

/// The parsed incoming request plus authentication state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Uppercase HTTP method.
    pub method: String,
    /// Path component, no query string.
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Headers with lowercased names.
    pub headers: HashMap<String, String>,
    /// Raw request body.
    pub body: Vec<u8>,
    /// Peer address, possibly behind X-Forwarded-For.
    pub client_ip: String,
    /// Set by the auth stage.
    pub authenticated: bool,
    /// Set by the auth stage.
    pub role: Option<AuthRole>,
    /// Wallet address supplied by the caller, preferred as rate-limit key.
    pub wallet_key: Option<String>,
    /// Tenant this request belongs to.
    pub tenant_id: String,
}

impl RequestContext {
    /// Build a context for a method and path; the adapter or test fills in
    /// the rest.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            client_ip: "127.0.0.1".into(),
            authenticated: false,
            role: None,
            wallet_key: None,
            tenant_id: TENANT_DEFAULT.into(),
        }
    }

    /// Header lookup by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Query parameter lookup.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    /// Whether this is a read request (GET/HEAD/OPTIONS).
    pub fn is_read(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD" | "OPTIONS")
    }

    /// The identity the rate limiters bucket on: wallet address when
    /// supplied, client IP otherwise.
    pub fn client_key(&self) -> String {
        self.wallet_key
            .clone()
            .unwrap_or_else(|| self.client_ip.clone())
    }
}

/// An HTTP response produced by a stage.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpResponse {
    /// A JSON response.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// A bare status with an empty JSON body.
    pub fn status(status: u16) -> Self {
        Self::json(status, Value::Null)
    }

    /// An error envelope.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, serde_json::json!({ "error": message.into() }))
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The pipeline's view of one request in flight.
pub struct MiddlewareContext {
    pub request: RequestContext,
    /// Written by whichever stage answers the request.
    pub response: Option<HttpResponse>,
    /// Cross-stage scratch space. Never read outside the pipeline.
    pub state: HashMap<String, Value>,
    /// When the pipeline entered.
    pub started_at: Instant,
    /// Once set, no further downstream stage runs.
    pub aborted: bool,
    /// Correlation id for logs.
    pub request_id: String,
}

impl MiddlewareContext {
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            response: None,
            state: HashMap::new(),
            started_at: Instant::now(),
            aborted: false,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Write the response and stop downstream traversal.
    pub fn respond_and_abort(&mut self, response: HttpResponse) {
        self.response = Some(response);
        self.aborted = true;
    }
}
