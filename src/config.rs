//! Runtime configuration loaded from the environment.
//!
//! `.env` in the working directory is loaded first (see [`load_dotenv`]), so
//! every key below can live there alongside `BOT_TOKEN`.

use std::time::Duration;

use crate::error::ConfigError;

/// Default time the operator has to send the code.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default host used when building `https://<host>/<bot>?start=<otp>` links.
pub const DEFAULT_DEEP_LINK_HOST: &str = "t.me";

/// Default Telegram Bot API endpoint.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default `getUpdates` long-poll timeout in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u32 = 25;

/// Settings that shape a pairing session and the live connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingConfig {
    /// How long a session listens before failing with a timeout.
    pub timeout: Duration,
    /// Host of the deep link shown to the operator.
    pub deep_link_host: String,
    /// Base URL of the Bot API.
    pub api_base_url: String,
    /// Server-side long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u32,
    /// Bind outgoing Bot API connections to IPv4. Some networks advertise
    /// IPv6 routes that silently drop traffic to the API.
    pub force_ipv4: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PAIRING_TIMEOUT,
            deep_link_host: DEFAULT_DEEP_LINK_HOST.to_string(),
            api_base_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            force_ipv4: true,
        }
    }
}

impl PairingConfig {
    /// Build a config from `PAIRING_TIMEOUT_MS`, `DEEP_LINK_HOST`,
    /// `TELEGRAM_API_URL`, `TELEGRAM_POLL_TIMEOUT_SECS` and
    /// `TELEGRAM_FORCE_IPV4`, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timeout = match lookup("PAIRING_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(parse_positive("PAIRING_TIMEOUT_MS", &raw)?),
            None => defaults.timeout,
        };

        let poll_timeout_secs = match lookup("TELEGRAM_POLL_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "TELEGRAM_POLL_TIMEOUT_SECS".to_string(),
                    message: e.to_string(),
                })?,
            None => defaults.poll_timeout_secs,
        };

        let deep_link_host = lookup("DEEP_LINK_HOST")
            .map(|h| h.trim().trim_end_matches('/').to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or(defaults.deep_link_host);

        let api_base_url = match lookup("TELEGRAM_API_URL") {
            Some(raw) => {
                url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                    key: "TELEGRAM_API_URL".to_string(),
                    message: e.to_string(),
                })?;
                raw.trim().trim_end_matches('/').to_string()
            }
            None => defaults.api_base_url,
        };

        let force_ipv4 = match lookup("TELEGRAM_FORCE_IPV4") {
            Some(raw) => parse_bool("TELEGRAM_FORCE_IPV4", &raw)?,
            None => defaults.force_ipv4,
        };

        Ok(Self {
            timeout,
            deep_link_host,
            api_base_url,
            poll_timeout_secs,
            force_ipv4,
        })
    }

    /// Override the session timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// Load `.env` from the working directory if present.
///
/// A missing file is fine; a malformed one is logged and otherwise ignored.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = PairingConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PairingConfig::default());
        assert_eq!(config.timeout, Duration::from_millis(60_000));
        assert_eq!(config.deep_link_host, "t.me");
    }

    #[test]
    fn test_overrides_from_env() {
        let config = PairingConfig::from_lookup(lookup_from(&[
            ("PAIRING_TIMEOUT_MS", "1500"),
            ("DEEP_LINK_HOST", "telegram.me/"),
            ("TELEGRAM_API_URL", "http://127.0.0.1:8081/"),
            ("TELEGRAM_POLL_TIMEOUT_SECS", "0"),
            ("TELEGRAM_FORCE_IPV4", "off"),
        ]))
        .unwrap();

        assert!(!config.force_ipv4);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.deep_link_host, "telegram.me");
        assert_eq!(config.api_base_url, "http://127.0.0.1:8081");
        assert_eq!(config.poll_timeout_secs, 0);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = PairingConfig::from_lookup(lookup_from(&[("PAIRING_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PAIRING_TIMEOUT_MS"));
    }

    #[test]
    fn test_non_numeric_timeout_rejected() {
        let err = PairingConfig::from_lookup(lookup_from(&[("PAIRING_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("PAIRING_TIMEOUT_MS"));
    }

    #[test]
    fn test_bad_api_url_rejected() {
        let err = PairingConfig::from_lookup(lookup_from(&[("TELEGRAM_API_URL", "not a url")]))
            .unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_API_URL"));
    }

    #[test]
    fn test_bad_bool_rejected() {
        let err = PairingConfig::from_lookup(lookup_from(&[("TELEGRAM_FORCE_IPV4", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_with_timeout() {
        let config = PairingConfig::default().with_timeout(Duration::from_millis(50));
        assert_eq!(config.timeout, Duration::from_millis(50));
    }
}
