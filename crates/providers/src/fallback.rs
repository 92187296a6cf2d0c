//! Fallback chains — ordered (provider, model) retries with health tracking.
//!
//! `complete_with_fallback` walks a chain until one entry succeeds. Entries
//! whose provider is unregistered are skipped silently; entries whose
//! provider is cooling down are skipped with a log line. Transient failures
//! feed the health tracker; non-transient failures advance the chain without
//! touching it, since they reflect the request rather than provider health.

use std::sync::Arc;

use roost_core::error::ProviderError;
use roost_core::{CompletionRequest, CompletionResponse, ProviderKind};
use tracing::{debug, info, warn};

use crate::health::HealthTracker;
use crate::registry::ProviderRegistry;

/// A single entry in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub provider: ProviderKind,
    pub model: String,
}

impl From<(ProviderKind, &str)> for ChainEntry {
    fn from((provider, model): (ProviderKind, &str)) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }
}

/// The named preset chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainName {
    HighCapability,
    Balanced,
    CostOptimized,
    Local,
    Cloud,
}

const HIGH_CAPABILITY: &[(ProviderKind, &str)] = &[
    (ProviderKind::Anthropic, "claude-opus-4"),
    (ProviderKind::Openai, "o1"),
    (ProviderKind::Anthropic, "claude-sonnet-4"),
];

const BALANCED: &[(ProviderKind, &str)] = &[
    (ProviderKind::Anthropic, "claude-sonnet-4"),
    (ProviderKind::Openai, "gpt-4o"),
    (ProviderKind::Ollama, "llama3:70b"),
];

const COST_OPTIMIZED: &[(ProviderKind, &str)] = &[
    (ProviderKind::Openai, "gpt-4o-mini"),
    (ProviderKind::Anthropic, "claude-3-5-haiku"),
    (ProviderKind::Ollama, "llama3:8b"),
];

const LOCAL: &[(ProviderKind, &str)] = &[
    (ProviderKind::Ollama, "qwen2.5:14b"),
    (ProviderKind::Ollama, "llama3:8b"),
    (ProviderKind::Ollama, "llama3.2:3b"),
];

const CLOUD: &[(ProviderKind, &str)] = &[
    (ProviderKind::Anthropic, "claude-sonnet-4"),
    (ProviderKind::Openai, "gpt-4o"),
    (ProviderKind::Anthropic, "claude-3-5-haiku"),
];

impl ChainName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighCapability => "high-capability",
            Self::Balanced => "balanced",
            Self::CostOptimized => "cost-optimized",
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    /// Materialize the preset entries.
    pub fn entries(&self) -> Vec<ChainEntry> {
        let raw = match self {
            Self::HighCapability => HIGH_CAPABILITY,
            Self::Balanced => BALANCED,
            Self::CostOptimized => COST_OPTIMIZED,
            Self::Local => LOCAL,
            Self::Cloud => CLOUD,
        };
        raw.iter().map(|&pair| pair.into()).collect()
    }
}

impl std::fmt::Display for ChainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executes fallback chains against the registry, tracking provider health.
pub struct FallbackManager {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
}

impl FallbackManager {
    pub fn new(registry: Arc<ProviderRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    /// The health tracker shared with the router.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Try each chain entry in order and return the first success, tagged
    /// with the provider and model that served it.
    pub async fn complete_with_fallback(
        &self,
        request: CompletionRequest,
        chain: &[ChainEntry],
    ) -> Result<CompletionResponse, ProviderError> {
        // Caller input is checked once, before any provider is consulted.
        // An invalid request must not burn through the chain.
        request.validate()?;

        let mut attempts: Vec<String> = Vec::new();

        for entry in chain {
            let Some(provider) = self.registry.get(entry.provider) else {
                continue;
            };

            if !self.health.is_available(entry.provider) {
                info!(
                    provider = %entry.provider,
                    model = %entry.model,
                    "Skipping provider in cooldown"
                );
                attempts.push(format!(
                    "{}/{}: skipped (cooling down)",
                    entry.provider, entry.model
                ));
                continue;
            }

            debug!(provider = %entry.provider, model = %entry.model, "Trying chain entry");

            match provider
                .complete(request.clone().with_model(entry.model.clone()))
                .await
            {
                Ok(mut response) => {
                    self.health.mark_success(entry.provider);
                    response.used_provider = Some(entry.provider);
                    response.used_model = Some(entry.model.clone());
                    return Ok(response);
                }
                Err(e) => {
                    if e.is_transient() {
                        self.health.mark_failure(entry.provider);
                        warn!(
                            provider = %entry.provider,
                            model = %entry.model,
                            error = %e,
                            "Transient provider failure, trying next chain entry"
                        );
                    } else {
                        warn!(
                            provider = %entry.provider,
                            model = %entry.model,
                            error = %e,
                            "Provider failure (non-transient), trying next chain entry"
                        );
                    }
                    attempts.push(format!("{}/{}: {e}", entry.provider, entry.model));
                }
            }
        }

        Err(ProviderError::AllProvidersFailed(attempts.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roost_core::{ManualClock, Message, Provider, ProviderInfo};
    use std::sync::Mutex;

    /// A mock provider that always fails with a fixed error.
    struct FailingProvider {
        kind: ProviderKind,
        error: ProviderError,
        call_count: Mutex<usize>,
    }

    impl FailingProvider {
        fn new(kind: ProviderKind, error: ProviderError) -> Self {
            Self {
                kind,
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FailingProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                kind: self.kind,
                display_name: "failing".into(),
                configured: true,
            }
        }
    }

    /// A mock provider that always succeeds with fixed content.
    struct SuccessProvider {
        kind: ProviderKind,
        content: String,
        call_count: Mutex<usize>,
    }

    impl SuccessProvider {
        fn new(kind: ProviderKind, content: &str) -> Self {
            Self {
                kind,
                content: content.into(),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for SuccessProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Ok(CompletionResponse {
                content: self.content.clone(),
                tool_calls: Vec::new(),
                usage: None,
                model: request.model,
                used_provider: None,
                used_model: None,
            })
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                kind: self.kind,
                display_name: "success".into(),
                configured: true,
            }
        }
    }

    fn test_request() -> CompletionRequest {
        CompletionRequest::new("placeholder", vec![Message::user("hello")])
    }

    fn chain(entries: &[(ProviderKind, &str)]) -> Vec<ChainEntry> {
        entries.iter().map(|&pair| pair.into()).collect()
    }

    fn manager_from(
        registry: ProviderRegistry,
        clock: ManualClock,
    ) -> (FallbackManager, Arc<HealthTracker>) {
        let health = Arc::new(HealthTracker::new(Arc::new(clock)));
        (
            FallbackManager::new(Arc::new(registry), health.clone()),
            health,
        )
    }

    #[tokio::test]
    async fn first_success_wins() {
        let p1 = Arc::new(SuccessProvider::new(ProviderKind::Anthropic, "primary"));
        let p2 = Arc::new(SuccessProvider::new(ProviderKind::Openai, "secondary"));
        let (manager, _) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1.clone());
            registry.register(p2.clone());
            manager_from(registry, ManualClock::new(0))
        };

        let result = manager
            .complete_with_fallback(
                test_request(),
                &chain(&[
                    (ProviderKind::Anthropic, "claude-sonnet-4"),
                    (ProviderKind::Openai, "gpt-4o"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "primary");
        assert_eq!(result.used_provider, Some(ProviderKind::Anthropic));
        assert_eq!(result.used_model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn transient_failure_falls_through_and_marks_health() {
        let p1 = Arc::new(FailingProvider::new(
            ProviderKind::Anthropic,
            ProviderError::ApiError {
                status_code: 429,
                message: "rate limit exceeded".into(),
            },
        ));
        let p2 = Arc::new(SuccessProvider::new(ProviderKind::Openai, "fallback"));
        let (manager, health) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1.clone());
            registry.register(p2.clone());
            manager_from(registry, ManualClock::new(0))
        };

        let result = manager
            .complete_with_fallback(
                test_request(),
                &chain(&[
                    (ProviderKind::Anthropic, "claude-sonnet-4"),
                    (ProviderKind::Openai, "gpt-4o"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "fallback");
        assert_eq!(result.used_provider, Some(ProviderKind::Openai));
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);

        let record = health.snapshot(ProviderKind::Anthropic).unwrap();
        assert_eq!(record.consecutive_failures, 1);
        assert!(record.healthy);
    }

    #[tokio::test]
    async fn non_transient_failure_advances_without_marking() {
        let p1 = Arc::new(FailingProvider::new(
            ProviderKind::Anthropic,
            ProviderError::ModelNotFound("claude-typo".into()),
        ));
        let p2 = Arc::new(SuccessProvider::new(ProviderKind::Openai, "rescued"));
        let (manager, health) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1.clone());
            registry.register(p2);
            manager_from(registry, ManualClock::new(0))
        };

        let result = manager
            .complete_with_fallback(
                test_request(),
                &chain(&[
                    (ProviderKind::Anthropic, "claude-typo"),
                    (ProviderKind::Openai, "gpt-4o"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "rescued");
        assert!(health.snapshot(ProviderKind::Anthropic).is_none());
    }

    #[tokio::test]
    async fn repeated_failures_put_provider_into_cooldown() {
        let p1 = Arc::new(FailingProvider::new(
            ProviderKind::Anthropic,
            ProviderError::ApiError {
                status_code: 429,
                message: "rate limit exceeded".into(),
            },
        ));
        let p2 = Arc::new(SuccessProvider::new(ProviderKind::Openai, "ok"));
        let clock = ManualClock::new(1_000_000);
        let (manager, health) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1.clone());
            registry.register(p2);
            manager_from(registry, clock.clone())
        };

        let entries = chain(&[
            (ProviderKind::Anthropic, "claude-sonnet-4"),
            (ProviderKind::Openai, "gpt-4o"),
        ]);
        for _ in 0..3 {
            manager
                .complete_with_fallback(test_request(), &entries)
                .await
                .unwrap();
        }

        assert!(!health.is_available(ProviderKind::Anthropic));
        assert_eq!(p1.calls(), 3);

        // While cooling, the chain skips anthropic entirely.
        manager
            .complete_with_fallback(test_request(), &entries)
            .await
            .unwrap();
        assert_eq!(p1.calls(), 3);

        // After the window elapses the record resets and anthropic is retried.
        clock.advance(61_000);
        assert!(health.is_available(ProviderKind::Anthropic));
        let record = health.snapshot(ProviderKind::Anthropic).unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.healthy);
    }

    #[tokio::test]
    async fn exhaustion_aggregates_attempts() {
        let p1 = Arc::new(FailingProvider::new(
            ProviderKind::Anthropic,
            ProviderError::Network("conn refused".into()),
        ));
        let p2 = Arc::new(FailingProvider::new(
            ProviderKind::Openai,
            ProviderError::AuthenticationFailed("bad key".into()),
        ));
        let (manager, _) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1);
            registry.register(p2);
            manager_from(registry, ManualClock::new(0))
        };

        let err = manager
            .complete_with_fallback(
                test_request(),
                &chain(&[
                    (ProviderKind::Anthropic, "claude-sonnet-4"),
                    (ProviderKind::Openai, "gpt-4o"),
                ]),
            )
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("All providers in fallback chain failed"));
        assert!(msg.contains("anthropic/claude-sonnet-4:"));
        assert!(msg.contains("openai/gpt-4o:"));
    }

    #[tokio::test]
    async fn unregistered_provider_is_skipped_silently() {
        let p2 = Arc::new(SuccessProvider::new(ProviderKind::Openai, "only"));
        let (manager, _) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p2.clone());
            manager_from(registry, ManualClock::new(0))
        };

        let result = manager
            .complete_with_fallback(
                test_request(),
                &chain(&[
                    (ProviderKind::Anthropic, "claude-sonnet-4"),
                    (ProviderKind::Openai, "gpt-4o"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "only");
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_providers() {
        let p1 = Arc::new(SuccessProvider::new(ProviderKind::Anthropic, "x"));
        let (manager, _) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1.clone());
            manager_from(registry, ManualClock::new(0))
        };

        let bad = CompletionRequest::new("model", vec![]);
        let err = manager
            .complete_with_fallback(bad, &chain(&[(ProviderKind::Anthropic, "claude-sonnet-4")]))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_accumulate_failures() {
        let p1 = Arc::new(FailingProvider::new(
            ProviderKind::Anthropic,
            ProviderError::Timeout("deadline".into()),
        ));
        let (manager, health) = {
            let mut registry = ProviderRegistry::new();
            registry.register(p1);
            manager_from(registry, ManualClock::new(0))
        };
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                let _ = m
                    .complete_with_fallback(
                        test_request(),
                        &[ChainEntry::from((ProviderKind::Anthropic, "claude-sonnet-4"))],
                    )
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let record = health.snapshot(ProviderKind::Anthropic).unwrap();
        // Some of the five may hit the cooldown skip once three failures
        // land, but every completed call either failed or was skipped.
        assert!(record.consecutive_failures >= 3);
        assert!(!record.healthy);
    }

    #[test]
    fn named_chains_are_populated() {
        for name in [
            ChainName::HighCapability,
            ChainName::Balanced,
            ChainName::CostOptimized,
            ChainName::Local,
            ChainName::Cloud,
        ] {
            assert!(!name.entries().is_empty(), "{name} chain empty");
        }
        assert!(
            ChainName::Local
                .entries()
                .iter()
                .all(|e| e.provider == ProviderKind::Ollama)
        );
        assert!(
            ChainName::Cloud
                .entries()
                .iter()
                .all(|e| e.provider.is_cloud())
        );
    }
}
