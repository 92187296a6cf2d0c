//! Startup key bootstrap for non-localhost binds.
//!
//! Binding a public interface without an API key is only allowed when the
//! process can mint one itself: generate a key, append it to `.env` in a
//! single append-mode open, and log it once. If `.env` already carries an
//! `API_KEY=` line the environment and the file disagree, and the safe move
//! is to refuse to start.

use std::io::Write;
use std::path::Path;

use roost_core::error::SecurityError;
use tracing::{info, warn};

use crate::keys::{generate_api_key, key_fingerprint};

/// Ensure a key exists before binding a non-loopback interface.
///
/// Returns the generated key when one was minted, `None` when nothing had to
/// be done (localhost bind, or a key already configured).
pub fn bootstrap_env_key(
    env_path: &Path,
    is_localhost_bind: bool,
    configured_key: Option<&str>,
) -> Result<Option<String>, SecurityError> {
    if configured_key.is_some() || is_localhost_bind {
        return Ok(None);
    }

    // The refusal check reads the file first; the write below is a single
    // O_WRONLY|O_CREAT|O_APPEND open, not a stat-then-write.
    if let Ok(contents) = std::fs::read_to_string(env_path) {
        let has_key_line = contents
            .lines()
            .any(|line| line.trim_start().starts_with("API_KEY="));
        if has_key_line {
            return Err(SecurityError::KeyConflict(format!(
                "{} already defines API_KEY but the environment does not; \
                 refusing to start on a non-localhost bind",
                env_path.display()
            )));
        }
    }

    let key = generate_api_key();

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(env_path)
        .map_err(|e| SecurityError::Io(format!("open {}: {e}", env_path.display())))?;
    file.write_all(format!("API_KEY={key}\n").as_bytes())
        .map_err(|e| SecurityError::Io(format!("write {}: {e}", env_path.display())))?;

    warn!(
        bind = "non-localhost",
        fingerprint = %key_fingerprint(&key),
        "No API_KEY configured; generated one and appended it to .env"
    );
    info!("Generated API key: {key}");

    Ok(Some(key))
}
