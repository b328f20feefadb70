//! Process configuration, read once from the environment.

use chrono::Duration;
use thiserror::Error;

use stockroom_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEV_JWT_SECRET: &str = "dev-secret";
pub const DEFAULT_JWT_TTL_MINUTES: i64 = 720;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not valid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("BOOTSTRAP_ADMIN_USERNAME, _EMAIL and _PASSWORD must be set together")]
    PartialBootstrap,
}

/// Credentials for the first super admin, seeded only into an empty user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    /// `None` runs on the in-memory backend.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub max_upload_bytes: usize,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_ttl: Duration::minutes(DEFAULT_JWT_TTL_MINUTES),
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            bootstrap_admin: None,
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let jwt_ttl = match get("JWT_TTL_MINUTES") {
            Some(raw) => {
                let minutes: i64 = parse("JWT_TTL_MINUTES", &raw)?;
                if minutes <= 0 {
                    return Err(ConfigError::Invalid {
                        var: "JWT_TTL_MINUTES",
                        reason: "must be positive".to_string(),
                    });
                }
                Duration::minutes(minutes)
            }
            None => defaults.jwt_ttl,
        };

        let bootstrap_admin = match (
            get("BOOTSTRAP_ADMIN_USERNAME"),
            get("BOOTSTRAP_ADMIN_EMAIL"),
            get("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(BootstrapAdmin {
                username,
                email,
                password,
            }),
            (None, None, None) => None,
            _ => return Err(ConfigError::PartialBootstrap),
        };

        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::Invalid { var: "LOG_FORMAT", reason })?,
            None => defaults.log_format,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            jwt_secret: get("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            jwt_ttl,
            database_url: get("DATABASE_URL"),
            database_max_connections: match get("DATABASE_MAX_CONNECTIONS") {
                Some(raw) => parse("DATABASE_MAX_CONNECTIONS", &raw)?,
                None => defaults.database_max_connections,
            },
            max_upload_bytes: match get("MAX_UPLOAD_BYTES") {
                Some(raw) => parse("MAX_UPLOAD_BYTES", &raw)?,
                None => defaults.max_upload_bytes,
            },
            bootstrap_admin,
            log_format,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.uses_dev_secret());
        assert_eq!(cfg.max_upload_bytes, 10_485_760);
    }

    #[test]
    fn values_are_parsed() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("JWT_TTL_MINUTES", "30"),
            ("DATABASE_URL", "postgres://localhost/stockroom"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("LOG_FORMAT", "pretty"),
            ("BOOTSTRAP_ADMIN_USERNAME", "root"),
            ("BOOTSTRAP_ADMIN_EMAIL", "root@shop.test"),
            ("BOOTSTRAP_ADMIN_PASSWORD", "rootpass"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.jwt_ttl, Duration::minutes(30));
        assert_eq!(cfg.database_max_connections, 4);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.bootstrap_admin.unwrap().username, "root");
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(matches!(
            config(&[("MAX_UPLOAD_BYTES", "lots")]),
            Err(ConfigError::Invalid { var: "MAX_UPLOAD_BYTES", .. })
        ));
        assert!(matches!(
            config(&[("JWT_TTL_MINUTES", "0")]),
            Err(ConfigError::Invalid { var: "JWT_TTL_MINUTES", .. })
        ));
        assert_eq!(
            config(&[("BOOTSTRAP_ADMIN_USERNAME", "root")]),
            Err(ConfigError::PartialBootstrap)
        );
    }
}
