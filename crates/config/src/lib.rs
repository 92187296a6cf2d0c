//! Configuration loading and validation for Roost.
//!
//! All settings come from the process environment. `AppConfig::from_env()`
//! reads them once at startup; every field has a sensible default so a bare
//! `roost serve` works on localhost with no configuration at all.

use roost_core::ProviderKind;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate limiter settings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Provider registry settings
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Local inference backend settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (BIND_HOST)
    #[serde(default = "default_host")]
    pub bind_host: String,

    /// Port to bind (PORT)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body cap in bytes (MAX_PAYLOAD_BYTES)
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// API key required on non-public paths (API_KEY). None means
    /// localhost-only operation with auth disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Admin key granting the admin role (ADMIN_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_api_key: Option<String>,

    /// CORS allow-list (ALLOWED_ORIGINS, comma-separated). Empty means
    /// wildcard.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed GET/HEAD/OPTIONS requests per window (RATE_LIMIT_GET)
    #[serde(default = "default_rate_get")]
    pub max_get: u32,

    /// Allowed POST/PUT/DELETE requests per window (RATE_LIMIT_MUTATION)
    #[serde(default = "default_rate_mutation")]
    pub max_mutation: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Paths that bypass both limiters
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Explicit provider subset (ENABLED_PROVIDERS, comma-separated).
    /// None means "all registered".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<ProviderKind>>,

    /// ANTHROPIC_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,

    /// OPENAI_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    /// Optional model override for the council agent role (COUNCIL_MODEL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub council_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama daemon (OLLAMA_HOST)
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Explicit parallelism override (OLLAMA_MAX_PARALLEL). Positive value
    /// pins the slot scheduler's max weight and skips the GPU probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u32>,

    /// GPU layer override (OLLAMA_NUM_GPU). Zero forces CPU mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,

    /// Context window override (OLLAMA_NUM_CTX)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,

    /// Max generated tokens override (OLLAMA_NUM_PREDICT)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,

    /// Batch size override (OLLAMA_NUM_BATCH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_batch: Option<u32>,

    /// Per-request timeout in seconds (OLLAMA_REQUEST_TIMEOUT)
    #[serde(default = "default_ollama_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    18789
}
fn default_max_payload() -> usize {
    1_048_576
}
fn default_rate_get() -> u32 {
    120
}
fn default_rate_mutation() -> u32 {
    60
}
fn default_window_ms() -> i64 {
    60_000
}
fn default_exempt_paths() -> Vec<String> {
    vec![
        "/api/health".into(),
        "/webhooks/github".into(),
        "/ws".into(),
        "/.well-known/agent-card.json".into(),
    ]
}
fn default_ollama_host() -> String {
    "http://localhost:11434".into()
}
fn default_ollama_timeout() -> u64 {
    1800
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_host(),
            port: default_port(),
            max_payload_bytes: default_max_payload(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            admin_api_key: None,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_get: default_rate_get(),
            max_mutation: default_rate_mutation(),
            window_ms: default_window_ms(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            anthropic_api_key: None,
            openai_api_key: None,
            council_model: None,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            max_parallel: None,
            num_gpu: None,
            num_ctx: None,
            num_predict: None,
            num_batch: None,
            request_timeout_secs: default_ollama_timeout(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            providers: ProvidersConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &redact(&self.api_key))
            .field("admin_api_key", &redact(&self.admin_api_key))
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("enabled", &self.enabled)
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("council_model", &self.council_model)
            .finish()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("server", &self.server)
            .field("auth", &self.auth)
            .field("rate_limit", &self.rate_limit)
            .field("providers", &self.providers)
            .field("ollama", &self.ollama)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    ///
    /// Tests pass a closure over a map instead of mutating process-global
    /// environment state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(host) = get("BIND_HOST") {
            cfg.server.bind_host = host;
        }
        if let Some(port) = parse_num::<u16>(&get, "PORT") {
            cfg.server.port = port;
        }
        if let Some(cap) = parse_num::<usize>(&get, "MAX_PAYLOAD_BYTES") {
            cfg.server.max_payload_bytes = cap;
        }

        cfg.auth.api_key = get("API_KEY").filter(|s| !s.is_empty());
        cfg.auth.admin_api_key = get("ADMIN_API_KEY").filter(|s| !s.is_empty());
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            cfg.auth.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(n) = parse_num::<u32>(&get, "RATE_LIMIT_GET") {
            cfg.rate_limit.max_get = n;
        }
        if let Some(n) = parse_num::<u32>(&get, "RATE_LIMIT_MUTATION") {
            cfg.rate_limit.max_mutation = n;
        }

        if let Some(list) = get("ENABLED_PROVIDERS") {
            let kinds: Vec<ProviderKind> = list
                .split(',')
                .filter_map(|s| {
                    let parsed = ProviderKind::parse(s);
                    if parsed.is_none() && !s.trim().is_empty() {
                        warn!(provider = %s.trim(), "Unknown provider in ENABLED_PROVIDERS, ignoring");
                    }
                    parsed
                })
                .collect();
            if !kinds.is_empty() {
                cfg.providers.enabled = Some(kinds);
            }
        }
        cfg.providers.anthropic_api_key = get("ANTHROPIC_API_KEY").filter(|s| !s.is_empty());
        cfg.providers.openai_api_key = get("OPENAI_API_KEY").filter(|s| !s.is_empty());
        cfg.providers.council_model = get("COUNCIL_MODEL").filter(|s| !s.is_empty());

        if let Some(host) = get("OLLAMA_HOST") {
            cfg.ollama.host = normalize_ollama_host(&host);
        }
        cfg.ollama.max_parallel = parse_num::<u32>(&get, "OLLAMA_MAX_PARALLEL");
        cfg.ollama.num_gpu = parse_num::<u32>(&get, "OLLAMA_NUM_GPU");
        cfg.ollama.num_ctx = parse_num::<u32>(&get, "OLLAMA_NUM_CTX");
        cfg.ollama.num_predict = parse_num::<u32>(&get, "OLLAMA_NUM_PREDICT");
        cfg.ollama.num_batch = parse_num::<u32>(&get, "OLLAMA_NUM_BATCH");
        if let Some(secs) = parse_num::<u64>(&get, "OLLAMA_REQUEST_TIMEOUT") {
            cfg.ollama.request_timeout_secs = secs;
        }

        cfg
    }

    /// Whether the server binds only to a loopback interface.
    pub fn is_localhost_bind(&self) -> bool {
        matches!(
            self.server.bind_host.as_str(),
            "127.0.0.1" | "::1" | "localhost"
        )
    }

    /// Whether any cloud provider credential is configured.
    pub fn has_cloud_credentials(&self) -> bool {
        self.providers.anthropic_api_key.is_some() || self.providers.openai_api_key.is_some()
    }

    /// The provider subset to register: the explicit ENABLED_PROVIDERS list,
    /// or every kind when unset.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        match &self.providers.enabled {
            Some(list) => list.clone(),
            None => ProviderKind::all().to_vec(),
        }
    }
}

fn parse_num<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable numeric setting");
            None
        }
    }
}

/// Ollama conventionally accepts bare `host:port`; the HTTP client needs a
/// scheme.
fn normalize_ollama_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_are_localhost_and_unauthenticated() {
        let cfg = AppConfig::default();
        assert!(cfg.is_localhost_bind());
        assert!(cfg.auth.api_key.is_none());
        assert_eq!(cfg.server.port, 18789);
        assert_eq!(cfg.server.max_payload_bytes, 1_048_576);
        assert_eq!(cfg.rate_limit.max_get, 120);
        assert_eq!(cfg.rate_limit.max_mutation, 60);
        assert!(!cfg.has_cloud_credentials());
    }

    #[test]
    fn env_overrides_apply() {
        let map = HashMap::from([
            ("BIND_HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("API_KEY", "secret"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ("RATE_LIMIT_GET", "10"),
            ("RATE_LIMIT_MUTATION", "5"),
            ("ANTHROPIC_API_KEY", "sk-ant-x"),
            ("OLLAMA_REQUEST_TIMEOUT", "120"),
        ]);
        let cfg = AppConfig::from_lookup(lookup(&map));

        assert!(!cfg.is_localhost_bind());
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.auth.api_key.as_deref(), Some("secret"));
        assert_eq!(
            cfg.auth.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(cfg.rate_limit.max_get, 10);
        assert_eq!(cfg.rate_limit.max_mutation, 5);
        assert!(cfg.has_cloud_credentials());
        assert_eq!(cfg.ollama.request_timeout_secs, 120);
    }

    #[test]
    fn enabled_providers_parses_case_insensitively() {
        let map = HashMap::from([("ENABLED_PROVIDERS", "Anthropic, OLLAMA, bogus")]);
        let cfg = AppConfig::from_lookup(lookup(&map));
        assert_eq!(
            cfg.providers.enabled,
            Some(vec![ProviderKind::Anthropic, ProviderKind::Ollama])
        );
    }

    #[test]
    fn enabled_providers_defaults_to_all() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.enabled_providers().len(), 3);
    }

    #[test]
    fn unparseable_numbers_keep_defaults() {
        let map = HashMap::from([("PORT", "not-a-port"), ("RATE_LIMIT_GET", "-3")]);
        let cfg = AppConfig::from_lookup(lookup(&map));
        assert_eq!(cfg.server.port, 18789);
        assert_eq!(cfg.rate_limit.max_get, 120);
    }

    #[test]
    fn ollama_host_gains_scheme() {
        let map = HashMap::from([("OLLAMA_HOST", "gpu-box:11434")]);
        let cfg = AppConfig::from_lookup(lookup(&map));
        assert_eq!(cfg.ollama.host, "http://gpu-box:11434");

        let map = HashMap::from([("OLLAMA_HOST", "https://ollama.internal/")]);
        let cfg = AppConfig::from_lookup(lookup(&map));
        assert_eq!(cfg.ollama.host, "https://ollama.internal");
    }

    #[test]
    fn debug_redacts_secrets() {
        let map = HashMap::from([("API_KEY", "super-secret"), ("OPENAI_API_KEY", "sk-x")]);
        let cfg = AppConfig::from_lookup(lookup(&map));
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("sk-x"));
        assert!(debug.contains("[REDACTED]"));
    }
}
