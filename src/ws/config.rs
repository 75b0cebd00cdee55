#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::HashMap;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use url::Url;

use crate::Result;
use crate::ws::key::WsKey;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_DEDUP_TTL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for the engine.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval for sending PING frames to keep the connection alive
    pub heartbeat_interval: Duration,
    /// Maximum time without any inbound frame after a PING before the connection is considered dead
    pub heartbeat_timeout: Duration,
    /// How long a request waits for its response
    pub request_timeout: Duration,
    /// How long ids of timed-out or cancelled requests are remembered so late responses are dropped
    pub dedup_ttl: Duration,
    /// Confirm each `session.logon` with a `session.status` call naming our API key
    pub verify_session: bool,
    /// Backoff between attempts and when a key gives up
    pub reconnect: ReconnectConfig,
    endpoints: HashMap<WsKey, Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_DURATION,
            dedup_ttl: DEFAULT_DEDUP_TTL_DURATION,
            verify_session: true,
            reconnect: ReconnectConfig::default(),
            endpoints: HashMap::new(),
        }
    }
}

impl Config {
    /// Routes `key` to `url` instead of its production endpoint.
    pub fn with_endpoint(mut self, key: WsKey, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(crate::error::Error::validation(format!(
                "endpoint for {key} must use ws or wss, got {}",
                url.scheme()
            )));
        }

        self.endpoints.insert(key, url);
        Ok(self)
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_verify_session(mut self, verify: bool) -> Self {
        self.verify_session = verify;
        self
    }

    /// Endpoint the engine dials for `key`.
    #[must_use]
    pub fn endpoint(&self, key: WsKey) -> String {
        self.endpoints
            .get(&key)
            .map_or_else(|| key.url().to_owned(), ToString::to_string)
    }
}

/// Backoff policy for re-opening a key's socket after a failed or lost connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed connection attempts before the key is marked
    /// unavailable. `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl ReconnectConfig {
    #[must_use]
    pub fn new(max_attempts: Option<u32>, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // max attempts are counted by the connection loop
            .build()
    }
}
