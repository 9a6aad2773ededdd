//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::util::time::DEFAULT_TICK_RATE;

const DEFAULT_MARKET_API_URL: &str = "https://api.dexscreener.com/latest/dex/tokens";

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// This instance is the designated primary game master
    pub official_game_master: bool,

    /// Realtime database URL. Unset runs on the in-process store.
    pub firebase_url: Option<String>,
    /// Database auth token
    pub firebase_auth: Option<String>,
    /// Path under which the session slots live
    pub session_root: String,

    /// Simulation ticks per second
    pub tick_rate: u32,

    /// Token whose market value is polled. Unset disables the poller.
    pub market_token_address: Option<String>,
    pub market_api_url: String,

    /// Allowed client origins for CORS. Empty allows any.
    pub client_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        // Hosted platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match non_empty("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => non_empty("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(ConfigError::invalid("LOG_FORMAT", other)),
        };

        let official_game_master = match non_empty("OFFICIAL_GAME_MASTER") {
            Some(value) => {
                parse_bool(&value).ok_or_else(|| ConfigError::invalid("OFFICIAL_GAME_MASTER", &value))?
            }
            None => false,
        };

        let tick_rate = match non_empty("TICK_RATE") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|rate| *rate > 0)
                .ok_or_else(|| ConfigError::invalid("TICK_RATE", &value))?,
            None => DEFAULT_TICK_RATE,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: non_empty("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,

            official_game_master,

            firebase_url: non_empty("FIREBASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            firebase_auth: non_empty("FIREBASE_AUTH"),
            session_root: non_empty("SESSION_ROOT").unwrap_or_else(|| "game/current".to_string()),

            tick_rate,

            market_token_address: non_empty("MARKET_TOKEN_ADDRESS"),
            market_api_url: non_empty("MARKET_API_URL")
                .unwrap_or_else(|| DEFAULT_MARKET_API_URL.to_string()),

            client_origins: non_empty("CLIENT_ORIGIN")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.official_game_master);
        assert_eq!(config.firebase_url, None);
        assert_eq!(config.session_root, "game/current");
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.market_api_url, DEFAULT_MARKET_API_URL);
        assert!(config.client_origins.is_empty());
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = load(&[("PORT", "3000"), ("SERVER_ADDR", "127.0.0.1:9000")]).unwrap();
        assert_eq!(config.server_addr.port(), 3000);
    }

    #[test]
    fn primary_flag_and_origins() {
        let config = load(&[
            ("OFFICIAL_GAME_MASTER", "Yes"),
            ("CLIENT_ORIGIN", "https://a.example, https://b.example,"),
            ("FIREBASE_URL", "https://db.example/"),
        ])
        .unwrap();
        assert!(config.official_game_master);
        assert_eq!(config.client_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.firebase_url.as_deref(), Some("https://db.example"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("OFFICIAL_GAME_MASTER", "maybe")]),
            Err(ConfigError::Invalid { var: "OFFICIAL_GAME_MASTER", .. })
        ));
        assert!(matches!(
            load(&[("TICK_RATE", "0")]),
            Err(ConfigError::Invalid { var: "TICK_RATE", .. })
        ));
        assert!(matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { var: "LOG_FORMAT", .. })
        ));
        assert!(matches!(
            load(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress)
        ));
    }
}
