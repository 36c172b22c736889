//! Server configuration: defaults, builder setters, and environment
//! loading.

use std::path::PathBuf;
use std::time::Duration;

use pairline_session::SessionConfig;

/// Errors raised while loading configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set to something that does not parse.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the server needs to start.
///
/// ```rust
/// use std::time::Duration;
/// use pairline::ServerConfig;
///
/// let config = ServerConfig::default()
///     .host("127.0.0.1")
///     .port(9000)
///     .handshake_timeout(Duration::from_secs(45));
/// assert_eq!(config.bind_addr(), "127.0.0.1:9000");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root of the credential store; each session gets a subdirectory.
    pub session_path: PathBuf,
    /// Deadline for a first pairing to produce a result.
    pub handshake_timeout: Duration,
    /// How long `POST /qrcode` waits for a code to appear.
    pub pairing_wait: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            session_path: PathBuf::from("./sessions"),
            handshake_timeout: Duration::from_secs(30),
            pairing_wait: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Loads from the process environment. Unset variables keep their
    /// defaults.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `8080` |
    /// | `SESSION_PATH` | `./sessions` |
    /// | `HANDSHAKE_TIMEOUT_SECS` | `30` |
    /// | `PAIRING_WAIT_SECS` | `30` |
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if a set variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from an arbitrary key lookup. `from_env` with the process
    /// environment swapped out, which keeps tests off global state.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            config.host = host.trim().to_string();
        }
        if let Some(port) = get("PORT") {
            config.port = parse("PORT", &port)?;
        }
        if let Some(path) = get("SESSION_PATH") {
            config.session_path = PathBuf::from(path);
        }
        if let Some(secs) = get("HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = seconds("HANDSHAKE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = get("PAIRING_WAIT_SECS") {
            config.pairing_wait = seconds("PAIRING_WAIT_SECS", &secs)?;
        }
        Ok(config)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = path.into();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn pairing_wait(mut self, wait: Duration) -> Self {
        self.pairing_wait = wait;
        self
    }

    /// `host:port`, ready for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The session-layer settings derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: self.handshake_timeout,
            store_root: self.session_path.clone(),
            ..SessionConfig::default()
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn seconds(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse(key, value)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_from_lookup_reads_every_variable() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9090"),
            ("SESSION_PATH", "/var/lib/pairline"),
            ("HANDSHAKE_TIMEOUT_SECS", "45"),
            ("PAIRING_WAIT_SECS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
        assert_eq!(config.session_path, PathBuf::from("/var/lib/pairline"));
        assert_eq!(config.handshake_timeout, Duration::from_secs(45));
        assert_eq!(config.pairing_wait, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_blank_value_keeps_default() {
        let config =
            ServerConfig::from_lookup(lookup(&[("PORT", "  ")])).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_from_lookup_invalid_port_returns_error() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
        assert!(err.to_string().contains("eighty"));
    }

    #[test]
    fn test_from_lookup_zero_timeout_returns_error() {
        let result = ServerConfig::from_lookup(lookup(&[(
            "HANDSHAKE_TIMEOUT_SECS",
            "0",
        )]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "HANDSHAKE_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn test_session_config_carries_handshake_timeout() {
        let config =
            ServerConfig::default().handshake_timeout(Duration::from_secs(5));
        let session = config.session_config();
        assert_eq!(session.handshake_timeout, Duration::from_secs(5));
        assert_eq!(session.qr_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_session_config_stores_devices_under_session_path() {
        let config = ServerConfig::from_lookup(lookup(&[(
            "SESSION_PATH",
            "/var/lib/pairline",
        )]))
        .unwrap();

        let session = config.session_config();

        assert_eq!(session.store_root, PathBuf::from("/var/lib/pairline"));
        assert_eq!(
            session.store_dir(&"abc".into()),
            PathBuf::from("/var/lib/pairline/abc")
        );
    }
}
