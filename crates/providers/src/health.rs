//! Per-provider health tracking with exponential cooldown.
//!
//! Transient failures increment a consecutive-failure counter. Crossing the
//! threshold puts the provider into a cooldown window that doubles with each
//! further failure. A success, or an availability check after the window has
//! elapsed, resets the counter so the provider gets a fresh start.

use std::collections::HashMap;
use std::sync::RwLock;

use roost_core::{ProviderKind, SharedClock};
use tracing::{debug, info, warn};

/// Consecutive transient failures before a provider starts cooling down.
const FAILURE_THRESHOLD: u32 = 3;

/// Cooldown at the threshold; doubles per additional failure.
const BASE_COOLDOWN_MS: i64 = 60_000;

/// Health state for a single provider.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_failure_ms: i64,
    pub consecutive_failures: u32,
    /// Active cooldown window length. Zero while healthy.
    pub cooldown_ms: i64,
}

impl ProviderHealth {
    fn fresh() -> Self {
        Self {
            healthy: true,
            last_failure_ms: 0,
            consecutive_failures: 0,
            cooldown_ms: 0,
        }
    }
}

/// Tracks health records for every provider the fallback manager touches.
///
/// Safe for concurrent use: multiple in-flight completions may mark failures
/// against the same record.
pub struct HealthTracker {
    clock: SharedClock,
    records: RwLock<HashMap<ProviderKind, ProviderHealth>>,
}

impl HealthTracker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Record a transient failure.
    pub fn mark_failure(&self, provider: ProviderKind) {
        let now = self.clock.now_ms();
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(provider)
            .or_insert_with(ProviderHealth::fresh);

        record.consecutive_failures += 1;
        record.last_failure_ms = now;

        if record.consecutive_failures >= FAILURE_THRESHOLD {
            record.healthy = false;
            record.cooldown_ms =
                BASE_COOLDOWN_MS << (record.consecutive_failures - FAILURE_THRESHOLD);
            warn!(
                provider = %provider,
                failures = record.consecutive_failures,
                cooldown_ms = record.cooldown_ms,
                "Provider entering cooldown"
            );
        } else {
            debug!(
                provider = %provider,
                failures = record.consecutive_failures,
                "Provider failure recorded"
            );
        }
    }

    /// Record a success: the provider is healthy again and its failure
    /// streak is over.
    pub fn mark_success(&self, provider: ProviderKind) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(provider)
            .or_insert_with(ProviderHealth::fresh);
        record.healthy = true;
        record.consecutive_failures = 0;
        record.cooldown_ms = 0;
    }

    /// Whether the provider may be tried right now.
    ///
    /// An elapsed cooldown both reports available and resets the record, so
    /// the provider's next failure streak starts from zero.
    pub fn is_available(&self, provider: ProviderKind) -> bool {
        let now = self.clock.now_ms();
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get_mut(&provider) else {
            return true;
        };
        if record.healthy {
            return true;
        }

        let elapsed = now - record.last_failure_ms;
        if elapsed > record.cooldown_ms {
            info!(provider = %provider, elapsed_ms = elapsed, "Cooldown elapsed, provider available again");
            record.healthy = true;
            record.consecutive_failures = 0;
            record.cooldown_ms = 0;
            true
        } else {
            false
        }
    }

    /// Current record for a provider, if any failures or successes were seen.
    pub fn snapshot(&self, provider: ProviderKind) -> Option<ProviderHealth> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&provider)
            .cloned()
    }
}
