//! Process configuration parsed from environment variables.
//!
//! `main` loads `.env` (if present) through `dotenvy` before calling
//! `AppConfig::from_env`, so local development and deployments share one
//! code path.

const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECTION_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL required when STORE_BACKEND=postgres")]
    MissingDatabaseUrl,
    #[error("unknown STORE_BACKEND: {0}")]
    UnknownBackend(String),
    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String, max_connections: u32 },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub backend: StoreBackend,
    /// Outbound frames buffered per live connection before events are dropped.
    pub connection_queue_capacity: usize,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `STORE_BACKEND`: `postgres` (default) or `memory`
    /// - `DATABASE_URL`: required for `postgres`
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `CONNECTION_QUEUE_CAPACITY`: default 256
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when a value is malformed or a required value
    /// is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parse_or("PORT", lookup("PORT"), DEFAULT_PORT)?;
        let connection_queue_capacity = parse_or(
            "CONNECTION_QUEUE_CAPACITY",
            lookup("CONNECTION_QUEUE_CAPACITY"),
            DEFAULT_CONNECTION_QUEUE_CAPACITY,
        )?;
        if connection_queue_capacity == 0 {
            return Err(ConfigError::Invalid { key: "CONNECTION_QUEUE_CAPACITY", value: "0".into() });
        }

        let backend = match lookup("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => {
                let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
                let max_connections =
                    parse_or("DB_MAX_CONNECTIONS", lookup("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS)?;
                StoreBackend::Postgres { database_url, max_connections }
            }
            "memory" => StoreBackend::Memory,
            other => return Err(ConfigError::UnknownBackend(other.to_owned())),
        };

        Ok(Self { port, backend, connection_queue_capacity })
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_database_url() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.connection_queue_capacity, DEFAULT_CONNECTION_QUEUE_CAPACITY);
        assert_eq!(
            cfg.backend,
            StoreBackend::Postgres { database_url: "postgres://x".into(), max_connections: DEFAULT_DB_MAX_CONNECTIONS }
        );
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(AppConfig::from_lookup(lookup_from(&[])), Err(ConfigError::MissingDatabaseUrl));
    }

    #[test]
    fn memory_backend_needs_no_url() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory"), ("PORT", "8080")])).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn rejects_unknown_backend_and_bad_numbers() {
        assert_eq!(
            AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "sqlite")])),
            Err(ConfigError::UnknownBackend("sqlite".into()))
        );
        assert!(matches!(
            AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory"), ("PORT", "http")])),
            Err(ConfigError::Invalid { key: "PORT", .. })
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory"), ("CONNECTION_QUEUE_CAPACITY", "0")])),
            Err(ConfigError::Invalid { key: "CONNECTION_QUEUE_CAPACITY", .. })
        ));
    }
}
