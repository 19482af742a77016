use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

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
    pub database_path: String,
    pub auth_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub auth_clock_skew: Duration,
    pub op_retention: Duration,
    pub change_retention: Duration,
    pub housekeeping_interval: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("auth_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("op_retention", &self.op_retention)
            .field("change_retention", &self.change_retention)
            .field("housekeeping_interval", &self.housekeeping_interval)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "TALLY_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "TALLY_DATABASE_PATH", "data/tally.db");

        let auth_secret = required_trimmed(&lookup, "TALLY_AUTH_SECRET")?;
        if auth_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "TALLY_AUTH_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        let jwt_issuer = value_or_default(&lookup, "TALLY_JWT_ISSUER", "tally-auth");
        let jwt_audience = value_or_default(&lookup, "TALLY_JWT_AUDIENCE", "tally");

        let auth_clock_skew_secs = parse_ranged(
            &lookup,
            "AUTH_CLOCK_SKEW_SECS",
            "60",
            0,
            300,
        )?;

        let op_retention_days = parse_ranged(&lookup, "SYNC_OP_RETENTION_DAYS", "30", 1, 365)?;
        let change_retention_days =
            parse_ranged(&lookup, "SYNC_CHANGE_RETENTION_DAYS", "90", 7, 3650)?;
        let housekeeping_interval_secs =
            parse_ranged(&lookup, "HOUSEKEEPING_INTERVAL_SECS", "3600", 60, 86_400)?;

        Ok(Self {
            bind_addr,
            database_path,
            auth_secret,
            jwt_issuer,
            jwt_audience,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            op_retention: Duration::from_secs(op_retention_days * 86_400),
            change_retention: Duration::from_secs(change_retention_days * 86_400),
            housekeeping_interval: Duration::from_secs(housekeeping_interval_secs),
        })
    }
}

fn parse_ranged(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let value = value_or_default(&lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
        })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
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
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_auth_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("TALLY_AUTH_SECRET"));
    }

    #[test]
    fn config_rejects_short_secret() {
        let mut map = HashMap::new();
        map.insert("TALLY_AUTH_SECRET", "too-short");
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn config_applies_defaults() {
        let mut map = HashMap::new();
        map.insert(
            "TALLY_AUTH_SECRET",
            "0123456789abcdef0123456789abcdef",
        );
        let config = config_from(&map).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.jwt_issuer, "tally-auth");
        assert_eq!(config.op_retention, Duration::from_secs(30 * 86_400));
        assert_eq!(config.housekeeping_interval, Duration::from_secs(3600));
    }

    #[test]
    fn config_validates_ranges() {
        let mut map = HashMap::new();
        map.insert(
            "TALLY_AUTH_SECRET",
            "0123456789abcdef0123456789abcdef",
        );
        map.insert("SYNC_CHANGE_RETENTION_DAYS", "1");
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("SYNC_CHANGE_RETENTION_DAYS"));
    }

    #[test]
    fn config_redacts_secret_in_debug() {
        let mut map = HashMap::new();
        map.insert(
            "TALLY_AUTH_SECRET",
            "super-secret-super-secret-super-secret",
        );
        let config = config_from(&map).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("super-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
