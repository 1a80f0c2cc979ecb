use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("缺少环境变量: {0}")]
    Missing(&'static str),

    #[error("环境变量 {name} 的值无效: {value}")]
    Invalid { name: &'static str, value: String },
}

/// 启动时从环境变量读取一次的配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiration_ms: i64,
    pub login_max_attempts: u32,
    pub login_attempt_window_secs: i64,
    pub login_attempt_capacity: usize,
    pub user_folder: PathBuf,
    pub public_base_url: String,
    pub bind_addr: String,
    pub log_dir: PathBuf,
    pub log_level: log::LevelFilter,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            jwt_secret: required("JWT_SECRET")?,
            // 5 天
            jwt_expiration_ms: parse_or(&lookup, "JWT_EXPIRATION_MS", 432_000_000)?,
            login_max_attempts: parse_or(&lookup, "LOGIN_MAX_ATTEMPTS", 5)?,
            login_attempt_window_secs: parse_or(&lookup, "LOGIN_ATTEMPT_WINDOW_SECS", 900)?,
            login_attempt_capacity: parse_or(&lookup, "LOGIN_ATTEMPT_CAPACITY", 100)?,
            user_folder: lookup("USER_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/user")),
            public_base_url: lookup("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            log_dir: lookup("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            log_level: parse_or(&lookup, "LOG_LEVEL", log::LevelFilter::Debug)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
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
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/users"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(config.jwt_expiration_ms, 432_000_000);
        assert_eq!(config.login_max_attempts, 5);
        assert_eq!(config.login_attempt_window_secs, 900);
        assert_eq!(config.login_attempt_capacity, 100);
        assert_eq!(config.log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn blank_secret_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/users"),
            ("JWT_SECRET", "   "),
        ]))
        .unwrap_err();

        assert_eq!(err, ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn invalid_number_names_the_variable() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/users"),
            ("JWT_SECRET", "s3cret"),
            ("LOGIN_MAX_ATTEMPTS", "five"),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "LOGIN_MAX_ATTEMPTS",
                value: "five".to_string()
            }
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/users"),
            ("JWT_SECRET", "s3cret"),
            ("PUBLIC_BASE_URL", "https://portal.example.com/"),
        ]))
        .unwrap();

        assert_eq!(config.public_base_url, "https://portal.example.com");
    }
}
