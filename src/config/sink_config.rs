//! Sink connection settings, with per-destination overrides.

use std::collections::HashMap;
use std::path::PathBuf;

/// Sink environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SinkEnvConfig {
    pub database_url: String,
    pub redis_url: String,
    pub redis_stream_maxlen: usize,
    pub file_storage_path: PathBuf,
    database_overrides: HashMap<String, String>,
    redis_overrides: HashMap<String, String>,
}

impl Default for SinkEnvConfig {
    fn default() -> Self {
        Self::from_vars(&HashMap::new())
    }
}

/// `db_primary` -> `DB_PRIMARY`
fn env_suffix(destination: &str) -> String {
    destination
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl SinkEnvConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| {
            vars.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        let overrides = |prefix: &str| {
            vars.iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(prefix)
                        .filter(|suffix| !suffix.is_empty())
                        .map(|suffix| (suffix.to_string(), v.clone()))
                })
                .collect::<HashMap<_, _>>()
        };

        Self {
            database_url: get("DATABASE_URL", "sqlite://data/dataflow.db"),
            redis_url: get("REDIS_URL", "redis://127.0.0.1:6379"),
            redis_stream_maxlen: get("REDIS_STREAM_MAXLEN", "10000")
                .parse::<usize>()
                .unwrap_or(10_000),
            file_storage_path: PathBuf::from(get("FILE_STORAGE_PATH", "data/files")),
            database_overrides: overrides("DATABASE_URL_"),
            redis_overrides: overrides("REDIS_URL_"),
        }
    }

    /// Connection URL for one relational destination (`DATABASE_URL_<DEST>` wins)
    pub fn database_url_for(&self, destination: &str) -> &str {
        self.database_overrides
            .get(&env_suffix(destination))
            .map(String::as_str)
            .unwrap_or(&self.database_url)
    }

    /// Connection URL for one Redis destination (`REDIS_URL_<DEST>` wins)
    pub fn redis_url_for(&self, destination: &str) -> &str {
        self.redis_overrides
            .get(&env_suffix(destination))
            .map(String::as_str)
            .unwrap_or(&self.redis_url)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_file_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_storage_path = path.into();
        self
    }
}
