//! Error types for the Roost domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Roost operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Schedule errors ---
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    // --- Security errors ---
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Message fragments that mark a provider failure as transient.
///
/// Transient failures suggest retry-on-another-provider and feed the health
/// tracker; anything else reflects caller input and leaves health untouched.
const TRANSIENT_MARKERS: [&str; 8] = [
    "rate limit",
    "429",
    "503",
    "502",
    "timeout",
    "econnrefused",
    "fetch failed",
    "overloaded",
];

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Completion aborted: {0}")]
    Aborted(String),

    #[error("All providers in fallback chain failed:\n{0}")]
    AllProvidersFailed(String),
}

impl ProviderError {
    /// Whether this failure warrants marking the provider unhealthy.
    ///
    /// Structured variants are classified directly; everything else falls
    /// back to a case-insensitive scan of the message for known transient
    /// markers (rate limits, 5xx, timeouts, connection refusal, overload).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Overloaded(_) | Self::Network(_) => {
                true
            }
            Self::ApiError { status_code, .. } if matches!(status_code, 429 | 502 | 503) => true,
            Self::InvalidRequest(_) | Self::ModelNotFound(_) | Self::AuthenticationFailed(_) => {
                false
            }
            other => {
                let msg = other.to_string().to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| msg.contains(m))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Authentication invalid: {0}")]
    AuthInvalid(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Payload too large: {size} bytes exceeds cap of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Subsystem unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthRequired(_) => 401,
            Self::AuthInvalid(_) => 403,
            Self::RateLimited { .. } => 429,
            Self::PayloadTooLarge { .. } => 413,
            Self::Validation(_) => 400,
            Self::Unavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Schedule too frequent: {0}")]
    TooFrequent(String),

    #[error("No fire time found: {0}")]
    NoFireTime(String),
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("API key conflict: {0}")]
    KeyConflict(String),

    #[error("Key bootstrap I/O failed: {0}")]
    Io(String),
}
