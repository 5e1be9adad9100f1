//! Process configuration, read from environment variables.
//!
//! Every setting has a default except `DATABASE_URL`, which only the
//! bootstrap binary requires. Malformed numbers are rejected rather than
//! silently replaced by the default.

use std::time::Duration;

use crate::error::DomainError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Session cookie/header name and lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub name: String,
    pub max_life_time: Duration,
}

/// Distributed lock tuning (retry delay, lease expiry, attempts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    pub retry_delay: Duration,
    pub expiry: Duration,
    pub tries: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            expiry: Duration::from_secs(3 * 60),
            tries: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub mode: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub log_level: String,
    pub database_url: Option<String>,
    pub policy_table: String,
    pub redis_url: String,
    pub session: SessionSettings,
    pub permissions_file: String,
    pub lock: LockSettings,
}

impl Environment {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("text") => LogFormat::Text,
            Some(other) => {
                return Err(DomainError::validation(format!(
                    "LOG_FORMAT must be 'json' or 'text', got '{other}'"
                )));
            }
        };

        let defaults = LockSettings::default();
        let lock = LockSettings {
            retry_delay: get("LOCK_RETRY_DELAY_MS")
                .map(|v| parse_number::<u64>("LOCK_RETRY_DELAY_MS", &v).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.retry_delay),
            expiry: get("LOCK_EXPIRY_SECS")
                .map(|v| parse_number::<u64>("LOCK_EXPIRY_SECS", &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.expiry),
            tries: get("LOCK_TRIES")
                .map(|v| parse_number::<u32>("LOCK_TRIES", &v))
                .transpose()?
                .unwrap_or(defaults.tries),
        };

        let max_life_time = get("SESSION_AUTH_MAX_LIFE_TIME")
            .map(|v| parse_number::<u64>("SESSION_AUTH_MAX_LIFE_TIME", &v))
            .transpose()?
            .unwrap_or(86_400);
        if max_life_time == 0 {
            return Err(DomainError::validation(
                "SESSION_AUTH_MAX_LIFE_TIME must be greater than zero",
            ));
        }

        Ok(Self {
            mode: get("CORE_MODE").unwrap_or_else(|| "debug".to_string()),
            port: get("CORE_PORT")
                .map(|v| parse_number::<u16>("CORE_PORT", &v))
                .transpose()?
                .unwrap_or(8020),
            log_format,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            database_url: get("DATABASE_URL"),
            policy_table: get("POLICY_TABLE").unwrap_or_else(|| "casbin_rule".to_string()),
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            session: SessionSettings {
                name: get("SESSION_AUTH_NAME").unwrap_or_else(|| "sid".to_string()),
                max_life_time: Duration::from_secs(max_life_time),
            },
            permissions_file: get("PERMISSIONS_FILE")
                .unwrap_or_else(|| "permissions.json".to_string()),
            lock,
        })
    }

    pub fn is_release(&self) -> bool {
        self.mode == "release"
    }
}

fn parse_number<T: core::str::FromStr>(key: &str, raw: &str) -> Result<T, DomainError>
where
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| DomainError::validation(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Result<Environment, DomainError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = env(&[]).unwrap();
        assert_eq!(cfg.port, 8020);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.session.name, "sid");
        assert_eq!(cfg.session.max_life_time, Duration::from_secs(86_400));
        assert_eq!(cfg.lock, LockSettings::default());
        assert_eq!(cfg.policy_table, "casbin_rule");
        assert!(cfg.database_url.is_none());
        assert!(!cfg.is_release());
    }

    #[test]
    fn overrides_are_read() {
        let cfg = env(&[
            ("CORE_MODE", "release"),
            ("LOG_FORMAT", "text"),
            ("SESSION_AUTH_NAME", "gh_sid"),
            ("SESSION_AUTH_MAX_LIFE_TIME", "60"),
            ("LOCK_RETRY_DELAY_MS", "50"),
            ("DATABASE_URL", "postgres://localhost/gatehouse"),
        ])
        .unwrap();
        assert!(cfg.is_release());
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.session.name, "gh_sid");
        assert_eq!(cfg.session.max_life_time, Duration::from_secs(60));
        assert_eq!(cfg.lock.retry_delay, Duration::from_millis(50));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/gatehouse"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(matches!(env(&[("CORE_PORT", "eighty")]), Err(DomainError::Validation(_))));
        assert!(env(&[("SESSION_AUTH_MAX_LIFE_TIME", "0")]).is_err());
        assert!(env(&[("LOG_FORMAT", "xml")]).is_err());
    }
}
