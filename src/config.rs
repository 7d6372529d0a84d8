//! Client configuration.
//!
//! Defaults match the braille services' reconnection contract (500ms base
//! delay, 5 bind attempts). Every value can be overridden from the
//! environment:
//!
//! | Variable                       | Meaning                          |
//! |--------------------------------|----------------------------------|
//! | `BRAILLE_SOCKET_DIR`           | directory holding service sockets |
//! | `BRAILLE_REQUEST_TIMEOUT_SECS` | per-request timeout              |
//! | `BRAILLE_REBIND_DELAY_MS`      | base delay before the first retry |
//! | `BRAILLE_MAX_BIND_ATTEMPTS`    | failures before giving up        |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::RetryPolicy;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration shared by the display client and the translator manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Reconnection backoff policy.
    pub retry: RetryPolicy,
    /// Upper bound on a single request/response round trip.
    pub request_timeout: Duration,
    /// Directory where service sockets live.
    pub socket_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            socket_dir: default_socket_dir(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unparseable values are logged and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("BRAILLE_SOCKET_DIR") {
            if !dir.is_empty() {
                config.socket_dir = PathBuf::from(dir);
            }
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "BRAILLE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, "BRAILLE_REBIND_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(millis);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "BRAILLE_MAX_BIND_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }

        config
    }

    /// Socket path for a service action.
    pub fn socket_path_for(&self, action: &str) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", action))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

/// Resolve the default directory for service sockets.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR` (Linux standard)
/// 2. the user cache directory (`~/Library/Caches` on macOS)
/// 3. `/tmp` (fallback)
pub fn default_socket_dir() -> PathBuf {
    // Try XDG_RUNTIME_DIR first (Linux standard, per-user)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir;
    }

    PathBuf::from("/tmp")
}
