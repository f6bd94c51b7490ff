//! Client configuration loaded from environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::repositories::{KeyValueStore, API_BASE_KEY};

/// Client configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP(S) base of the admin API (e.g. `https://api.example.com`).
    pub api_base: String,
    /// Directory backing the durable key-value store.
    pub storage_dir: PathBuf,
    /// Bearer token to seed the credential store with, if any.
    pub token: Option<String>,
    /// Base interval for WebSocket reconnects; the delay grows linearly from it.
    pub ws_reconnect_interval: Duration,
    pub ws_max_reconnect_attempts: u32,
    pub ws_heartbeat_interval: Duration,
    /// Consecutive `auth.error` rejections before the socket gives up (`0` = never).
    pub ws_max_auth_failures: u32,
    pub sse_initial_backoff: Duration,
    pub sse_max_backoff: Duration,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let api_base = std::env::var("PRIMUS_API_BASE")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let api_base = normalize_api_base(&api_base)?;

        let storage_dir = std::env::var("PRIMUS_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".primus"));
        let token = std::env::var("PRIMUS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let ws_reconnect_interval =
            Duration::from_millis(env_number("WS_RECONNECT_INTERVAL_MS", 3000)?);
        let ws_max_reconnect_attempts = env_number("WS_MAX_RECONNECT_ATTEMPTS", 10)?;
        let ws_heartbeat_interval = Duration::from_secs(env_number("WS_HEARTBEAT_SECS", 30)?);
        let ws_max_auth_failures = env_number("WS_MAX_AUTH_FAILURES", 3)?;
        let sse_initial_backoff = Duration::from_millis(env_number("SSE_INITIAL_BACKOFF_MS", 1000)?);
        let sse_max_backoff = Duration::from_millis(env_number("SSE_MAX_BACKOFF_MS", 30_000)?);
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_base,
            storage_dir,
            token,
            ws_reconnect_interval,
            ws_max_reconnect_attempts,
            ws_heartbeat_interval,
            ws_max_auth_failures,
            sse_initial_backoff,
            sse_max_backoff,
            log_level,
        })
    }

    /// Settings for the admin WebSocket channel.
    pub fn socket(&self) -> SocketConfig {
        SocketConfig {
            reconnect_interval: self.ws_reconnect_interval,
            max_reconnect_attempts: self.ws_max_reconnect_attempts,
            heartbeat_interval: self.ws_heartbeat_interval,
            max_auth_failures: self.ws_max_auth_failures,
        }
    }

    /// Settings for the SSE event stream.
    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            initial_backoff: self.sse_initial_backoff,
            max_backoff: self.sse_max_backoff,
        }
    }

    /// API base in effect: a stored override wins over the configured base.
    pub fn effective_api_base(&self, store: &dyn KeyValueStore) -> AppResult<String> {
        Ok(store
            .get(API_BASE_KEY)?
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.api_base.clone()))
    }
}

/// Persist an API base override (trailing `/` removed). Empty input is ignored.
pub fn set_api_base(store: &dyn KeyValueStore, url: &str) -> AppResult<()> {
    if url.trim().is_empty() {
        return Ok(());
    }
    let base = normalize_api_base(url).map_err(|e| AppError::Config(e.to_string()))?;
    store.set(API_BASE_KEY, &base)
}

/// `http://host` -> `ws://host/ws/admin`, `https://host/` -> `wss://host/ws/admin`.
pub fn websocket_url(api_base: &str) -> String {
    let base = api_base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws/admin")
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub max_auth_failures: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            max_auth_failures: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

fn env_number<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(var)),
        Err(_) => Ok(default),
    }
}

fn normalize_api_base(raw: &str) -> Result<String, ConfigLoadError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = reqwest::Url::parse(trimmed).map_err(|_| ConfigLoadError::InvalidApiBase)?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        _ => Err(ConfigLoadError::InvalidApiBase),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
    #[error("Invalid PRIMUS_API_BASE (expected an http or https URL)")]
    InvalidApiBase,
}
