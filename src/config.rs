//! Client configuration.
//!
//! Every knob has a default matching the backend's observed behavior; the
//! environment can override any of them via `ZT_*` variables.

use std::time::Duration;

use url::Url;

use crate::error::{Result, ZtError};

/// Reconnect policy for the push channels: capped exponential backoff with
/// jitter and a hard retry budget. Once the budget is spent the channel stays
/// offline until the caller reconnects (normally after re-authentication).
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
    /// Retries attempted before giving up.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the given attempt (0-based), with up to 20% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = 1.0 + (rand::random::<f64>() - 0.5) * 0.4;
        exp.mul_f64(jitter).min(self.max_delay)
    }
}

/// Configuration for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. `http://localhost:8000`.
    pub api_base: Url,
    /// WebSocket base, e.g. `ws://localhost:8000`.
    pub ws_base: Url,
    /// Bearer token for the authenticated session.
    pub session_token: String,
    /// Bounded window of recent decision events.
    pub event_capacity: usize,
    /// Points retained in the historical trust series.
    pub history_capacity: usize,
    /// How many history points to fetch when a session opens.
    pub history_fetch_limit: usize,
    /// Age past which a live trust point no longer wins over history.
    pub freshness_threshold: Duration,
    /// REST polling cadence when the push channel is not live.
    pub poll_interval: Duration,
    /// Lifetime of a step-up challenge.
    pub challenge_ttl: Duration,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(api_base: Url, ws_base: Url, session_token: impl Into<String>) -> Self {
        Self {
            api_base,
            ws_base,
            session_token: session_token.into(),
            event_capacity: 200,                            // decision feed window
            history_capacity: 300,
            history_fetch_limit: 60,                        // backend default
            freshness_threshold: Duration::from_millis(7500), // 3x push cadence
            poll_interval: Duration::from_millis(2500),
            challenge_ttl: Duration::from_secs(60),         // OTP store expiry
            request_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Load from environment variables, falling back to defaults.
    ///
    /// `ZT_API_BASE_URL`, `ZT_WS_BASE_URL` and `ZT_SESSION_TOKEN` are
    /// required; `ZT_EVENT_CAPACITY`, `ZT_POLL_INTERVAL_MS` and
    /// `ZT_CHALLENGE_TTL_SECS` are optional overrides.
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("ZT_API_BASE_URL")
            .map_err(|_| ZtError::Config("ZT_API_BASE_URL not set".into()))?;
        let ws_base = std::env::var("ZT_WS_BASE_URL")
            .map_err(|_| ZtError::Config("ZT_WS_BASE_URL not set".into()))?;
        let token = std::env::var("ZT_SESSION_TOKEN")
            .map_err(|_| ZtError::Config("ZT_SESSION_TOKEN not set".into()))?;

        let mut config = Self::new(parse_url(&api_base)?, parse_url(&ws_base)?, token);

        if let Some(n) = env_parse::<usize>("ZT_EVENT_CAPACITY") {
            config.event_capacity = n;
        }
        if let Some(ms) = env_parse::<u64>("ZT_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("ZT_CHALLENGE_TTL_SECS") {
            config.challenge_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Trust feed URL with the session token as a query parameter.
    pub fn trust_feed_url(&self) -> Result<Url> {
        let mut url = join_url(&self.ws_base, "/ws/trust")?;
        url.query_pairs_mut().append_pair("token", &self.session_token);
        Ok(url)
    }

    /// Decision broadcast feed URL (unauthenticated broadcast).
    pub fn decision_feed_url(&self) -> Result<Url> {
        join_url(&self.ws_base, "/ws/decisions")
    }
}

/// Join `path` under `base`, keeping any path prefix on the base:
/// `http://host/api` + `/mfa/request` → `http://host/api/mfa/request`.
/// A plain `Url::join` with an absolute path would drop the prefix.
pub(crate) fn join_url(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ZtError::Config(format!("bad endpoint {path}: {e}")))
}

fn parse_url(s: &str) -> Result<Url> {
    Url::parse(s).map_err(|e| ZtError::Config(format!("invalid url {s}: {e}")))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
