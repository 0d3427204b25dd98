use std::collections::HashMap;
use std::env;
use std::fmt;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Shared secret clients present as a bearer token (or `token` form field)
    pub api_token: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "LOAM_API_BIND_ADDR", DEFAULT_BIND_ADDR);
        if !bind_addr.contains(':') {
            return Err(ConfigError::Invalid(
                "LOAM_API_BIND_ADDR must be host:port".to_string(),
            ));
        }

        let api_token = required_trimmed(&lookup, "LOAM_API_TOKEN")?;
        Ok(Self {
            bind_addr,
            api_token,
        })
    }
}

fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default_value: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default_value.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_in<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| map.get(key).map(|value| (*value).to_string())
    }

    #[test]
    fn config_requires_token() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(lookup_in(&map)).unwrap_err();
        assert!(err.to_string().contains("LOAM_API_TOKEN"));
    }

    #[test]
    fn config_defaults_bind_addr_and_redacts_token() {
        let map = HashMap::from([("LOAM_API_TOKEN", " sensitive-token ")]);
        let config = AppConfig::from_lookup(lookup_in(&map)).unwrap();

        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.api_token, "sensitive-token");
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn config_rejects_bind_addr_without_port() {
        let map = HashMap::from([("LOAM_API_TOKEN", "t"), ("LOAM_API_BIND_ADDR", "localhost")]);
        assert!(matches!(
            AppConfig::from_lookup(lookup_in(&map)),
            Err(ConfigError::Invalid(_))
        ));
    }
}
