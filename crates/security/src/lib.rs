//! API key handling for the Roost gateway.
//!
//! Timing-safe key comparison, 256-bit key generation, rotation with a
//! grace window for the previous key, and the startup `.env` bootstrap for
//! non-localhost binds.

pub mod bootstrap;
pub mod keys;

pub use bootstrap::bootstrap_env_key;
pub use keys::{ApiKeyStore, generate_api_key, key_fingerprint, timing_safe_equal};
