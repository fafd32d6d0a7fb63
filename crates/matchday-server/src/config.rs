//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use matchday_shared::constants::{
    APP_NAME, DEFAULT_CONNECTION_QUEUE, DEFAULT_HTTP_PORT, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_TYPING_TTL_SECS, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./matchday.db`
    pub database_path: PathBuf,

    /// Admin API bearer token. Required to register participants.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Push new messages over the duplex channel. When off, the server runs
    /// polling-only and `/ws` is not mounted.
    /// Env: `LIVE_CHANNEL` (true/false)
    /// Default: `true`
    pub live_channel: bool,

    /// Silence after which a typing indicator is cleared.
    /// Env: `TYPING_TTL_SECS`
    /// Default: `5`
    pub typing_ttl: Duration,

    /// Poll interval advertised to clients on `/info`, clamped to 1..=5 s.
    /// Env: `POLL_INTERVAL_SECS`
    /// Default: `3`
    pub poll_interval: Duration,

    /// Outbound event queue per live connection. Events for a full queue are dropped.
    /// Env: `CONNECTION_QUEUE`
    /// Default: `256`
    pub connection_queue: usize,

    /// Sustained message sends per second per participant.
    /// Env: `SEND_RATE_PER_SEC`
    /// Default: `2.0`
    pub send_rate: f64,

    /// Burst of message sends allowed per participant.
    /// Env: `SEND_BURST`
    /// Default: `10`
    pub send_burst: f64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./matchday.db"),
            admin_token: None,
            live_channel: true,
            typing_ttl: Duration::from_secs(DEFAULT_TYPING_TTL_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            connection_queue: DEFAULT_CONNECTION_QUEUE,
            send_rate: 2.0,
            send_burst: 10.0,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("LIVE_CHANNEL") {
            config.live_channel = val != "false" && val != "0";
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "TYPING_TTL_SECS") {
            config.typing_ttl = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "POLL_INTERVAL_SECS") {
            let clamped = secs.clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);
            if clamped != secs {
                tracing::warn!(value = secs, clamped, "POLL_INTERVAL_SECS out of range");
            }
            config.poll_interval = Duration::from_secs(clamped);
        }

        if let Some(n) = parse_positive::<usize>(&lookup, "CONNECTION_QUEUE") {
            config.connection_queue = n;
        }

        if let Some(rate) = parse_positive::<f64>(&lookup, "SEND_RATE_PER_SEC") {
            config.send_rate = rate;
        }

        if let Some(burst) = parse_positive::<f64>(&lookup, "SEND_BURST") {
            config.send_burst = burst.max(1.0);
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a strictly positive number, warning about and ignoring anything else.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.live_channel);
        assert!(config.admin_token.is_none());
        assert_eq!(config.typing_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("ADMIN_TOKEN", "secret"),
            ("LIVE_CHANNEL", "false"),
            ("TYPING_TTL_SECS", "2"),
            ("SEND_BURST", "3"),
        ]));
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert!(!config.live_channel);
        assert_eq!(config.typing_ttl, Duration::from_secs(2));
        assert_eq!(config.send_burst, 3.0);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not an address"),
            ("ADMIN_TOKEN", ""),
            ("TYPING_TTL_SECS", "0"),
            ("CONNECTION_QUEUE", "lots"),
        ]));
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert!(config.admin_token.is_none());
        assert_eq!(config.typing_ttl, defaults.typing_ttl);
        assert_eq!(config.connection_queue, defaults.connection_queue);
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let config = ServerConfig::from_lookup(lookup_from(&[("POLL_INTERVAL_SECS", "60")]));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }
}
