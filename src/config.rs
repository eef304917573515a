//! Settings for connecting to a remote engine host.
//!
//! Defaults can be overridden from the environment:
//!
//! | Variable                        | Meaning                          |
//! |---------------------------------|----------------------------------|
//! | `ENGINE_PROXY_SOCKET`           | socket path                      |
//! | `ENGINE_PROXY_TIMEOUT_SECS`     | per-request timeout, 0 = none    |
//! | `ENGINE_PROXY_CONNECT_ATTEMPTS` | connection attempts with backoff |
//! | `ENGINE_PROXY_HEARTBEAT_MS`     | liveness ping interval, 0 = off  |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;


pub const SOCKET_ENV: &str = "ENGINE_PROXY_SOCKET";
pub const TIMEOUT_ENV: &str = "ENGINE_PROXY_TIMEOUT_SECS";
pub const CONNECT_ATTEMPTS_ENV: &str = "ENGINE_PROXY_CONNECT_ATTEMPTS";
pub const HEARTBEAT_ENV: &str = "ENGINE_PROXY_HEARTBEAT_MS";

const SOCKET_FILE_NAME: &str = "engine-proxy.sock";
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Resolve the default socket path for the engine host.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/engine-proxy.sock` (Linux standard)
/// 2. `~/Library/Caches/engine-proxy.sock` (macOS)
/// 3. `/tmp/engine-proxy.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(SOCKET_FILE_NAME);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join(SOCKET_FILE_NAME);
    }

    PathBuf::from("/tmp").join(SOCKET_FILE_NAME)
}

/// How a [`RemoteProxy`](crate::remote::RemoteProxy) reaches its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub socket_path: PathBuf,
    /// Requests not answered within this are treated as a lost connection.
    /// `None` lets engine commands run as long as they need.
    pub request_timeout: Option<Duration>,
    pub connect_attempts: u32,
    /// Liveness ping answered by the host independently of the engine.
    /// `None` disables it; failures are then detected from the socket alone.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout: None,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT),
        }
    }
}

impl RemoteConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(SOCKET_ENV).filter(|p| !p.trim().is_empty()) {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, TIMEOUT_ENV)? {
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, CONNECT_ATTEMPTS_ENV)? {
            config.connect_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, HEARTBEAT_ENV)? {
            config.heartbeat_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }

        tracing::debug!("Remote config: {:?}", config);
        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
