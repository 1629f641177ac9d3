//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_JITTER: f64 = 0.2;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 75;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PAIR_WINDOW_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Timing knobs for the connection manager and reconciler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportConfig {
    /// First reconnect delay; doubled per consecutive failure.
    pub reconnect_base: Duration,
    /// Upper bound for the reconnect delay before jitter.
    pub reconnect_max: Duration,
    /// Extra random delay as a fraction of the computed delay (`0.0` disables).
    pub reconnect_jitter: f64,
    /// Drop an open socket that has been silent this long. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Upper bound for one token fetch plus socket handshake.
    pub connect_timeout: Duration,
    /// How long a provisional entry may wait for its server echo.
    pub pair_window: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            reconnect_jitter: DEFAULT_RECONNECT_JITTER,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            pair_window: Duration::from_secs(DEFAULT_PAIR_WINDOW_SECS),
        }
    }
}

impl TransportConfig {
    /// Timing knobs from `THREADLINE_RECONNECT_BASE_MS`,
    /// `THREADLINE_RECONNECT_MAX_MS` and `THREADLINE_IDLE_TIMEOUT_SECS`.
    /// Unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_ms = parse_u64(lookup("THREADLINE_RECONNECT_BASE_MS").as_deref(), DEFAULT_RECONNECT_BASE_MS);
        let max_ms = parse_u64(lookup("THREADLINE_RECONNECT_MAX_MS").as_deref(), DEFAULT_RECONNECT_MAX_MS);
        let idle_secs = parse_u64(lookup("THREADLINE_IDLE_TIMEOUT_SECS").as_deref(), DEFAULT_IDLE_TIMEOUT_SECS);
        Self {
            reconnect_base: Duration::from_millis(base_ms),
            reconnect_max: Duration::from_millis(max_ms.max(base_ms)),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            ..Self::default()
        }
    }
}

/// Endpoints, seeded credentials and transport timing for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// HTTP base URL, without trailing slash (e.g. `"http://127.0.0.1:8000"`).
    pub api_url: String,
    /// WebSocket base URL; the socket lives at `{ws_url}/ws/{token}`.
    pub ws_url: String,
    /// Initial `access_token` cookie, when not relying on an existing jar.
    pub access_token: Option<String>,
    /// Initial `refresh_token` cookie.
    pub refresh_token: Option<String>,
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Build a config for `api_url`, deriving the socket URL from it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] unless the URL is `http(s)://`.
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = api_url.trim_end_matches('/').to_owned();
        let ws_url = ws_base_url(&api_url)?;
        Ok(Self { api_url, ws_url, access_token: None, refresh_token: None, transport: TransportConfig::default() })
    }

    /// Override the derived socket base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] unless the URL is `ws(s)://`.
    pub fn with_ws_url(mut self, ws_url: &str) -> Result<Self, ConfigError> {
        if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidBaseUrl(ws_url.to_owned()));
        }
        self.ws_url = ws_url.trim_end_matches('/').to_owned();
        Ok(self)
    }

    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `THREADLINE_API_URL`: default `http://127.0.0.1:8000`
    /// - `THREADLINE_WS_URL`: derived from the API URL when absent
    /// - `THREADLINE_ACCESS_TOKEN`, `THREADLINE_REFRESH_TOKEN`: seeded cookies
    /// - `THREADLINE_RECONNECT_BASE_MS`: default 1000
    /// - `THREADLINE_RECONNECT_MAX_MS`: default 30000
    /// - `THREADLINE_IDLE_TIMEOUT_SECS`: default 75, `0` disables
    ///
    /// # Errors
    ///
    /// Returns an error if either base URL has an unsupported scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] over an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if either base URL has an unsupported scheme.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let api_url = non_empty("THREADLINE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let mut config = Self::new(&api_url)?;
        if let Some(ws_url) = non_empty("THREADLINE_WS_URL") {
            config = config.with_ws_url(&ws_url)?;
        }
        config.access_token = non_empty("THREADLINE_ACCESS_TOKEN");
        config.refresh_token = non_empty("THREADLINE_REFRESH_TOKEN");
        config.transport = TransportConfig::from_lookup(&lookup);

        Ok(config)
    }

    /// Socket URL for one connection attempt. Consumes nothing; callers pass
    /// the token they just received.
    #[must_use]
    pub fn socket_url(&self, token: &str) -> String {
        format!("{}/ws/{token}", self.ws_url)
    }
}

/// Map an HTTP base URL onto the matching WebSocket scheme.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for anything but `http://` or `https://`.
pub fn ws_base_url(api_url: &str) -> Result<String, ConfigError> {
    let api_url = api_url.trim_end_matches('/');
    if let Some(rest) = api_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = api_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }

    Err(ConfigError::InvalidBaseUrl(api_url.to_owned()))
}

fn parse_u64(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default)
}
