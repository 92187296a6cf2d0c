//! API key generation, comparison, and rotation.
//!
//! Key comparison runs in constant time over the shorter input and mixes the
//! length difference into the accumulator, so unequal-length candidates take
//! the same time as equal-length ones and still compare unequal.

use std::sync::RwLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tracing::info;

/// Compare two strings without leaking where they diverge.
pub fn timing_safe_equal(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    let mut diff = a.len() ^ b.len();
    let shorter = a.len().min(b.len());
    for i in 0..shorter {
        diff |= (a[i] ^ b[i]) as usize;
    }
    diff == 0
}

/// Generate a fresh 256-bit API key, base64url-encoded without padding.
pub fn generate_api_key() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Short SHA-256 fingerprint of a key, safe to log.
pub fn key_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// A previous key kept alive through a rotation grace window.
#[derive(Debug, Clone)]
struct PreviousKey {
    key: String,
    expires_at_ms: i64,
}

#[derive(Debug)]
struct KeyState {
    current: String,
    previous: Option<PreviousKey>,
}

/// The process-wide API key with rotation support.
///
/// `validate` accepts the current key, or the previous key while its grace
/// window is open. Expired previous keys are rejected on every check; no
/// background sweep is needed.
#[derive(Debug)]
pub struct ApiKeyStore {
    state: RwLock<KeyState>,
}

impl ApiKeyStore {
    /// Create a store around an existing key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(KeyState {
                current: key.into(),
                previous: None,
            }),
        }
    }

    /// The current key.
    pub fn current(&self) -> String {
        self.state.read().unwrap_or_else(|e| e.into_inner()).current.clone()
    }

    /// Whether `candidate` matches the current key, or the previous key
    /// inside its grace window.
    pub fn validate(&self, candidate: &str, now_ms: i64) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        if timing_safe_equal(candidate, &state.current) {
            return true;
        }
        if let Some(prev) = &state.previous {
            if now_ms < prev.expires_at_ms && timing_safe_equal(candidate, &prev.key) {
                return true;
            }
        }
        false
    }

    /// Atomically install a freshly generated key, stashing the current one
    /// under `now + grace_ms`. Returns the new key.
    pub fn rotate(&self, grace_ms: i64, now_ms: i64) -> String {
        let new_key = generate_api_key();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        let old = std::mem::replace(&mut state.current, new_key.clone());
        info!(
            old_fingerprint = %key_fingerprint(&old),
            new_fingerprint = %key_fingerprint(&new_key),
            grace_ms,
            "API key rotated"
        );
        state.previous = Some(PreviousKey {
            key: old,
            expires_at_ms: now_ms + grace_ms,
        });

        new_key
    }
}
