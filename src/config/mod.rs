//! Configuration management.
//!
//! Configuration is resolved in this order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (explicit path, `DBKIT_CONFIG_PATH`, or the platform config dir)
//! 3. `DBKIT_*` environment variables

use crate::models::ConnectionDescriptor;
use crate::observability::{LogFormat, LoggingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "DBKIT_CONFIG_PATH";

/// Main configuration for dbkit.
#[derive(Debug, Clone)]
pub struct DbkitConfig {
    /// Default TTL for schema cache entries, in seconds.
    pub schema_cache_ttl_secs: u64,
    /// Maximum number of schema cache entries.
    pub schema_cache_capacity: usize,
    /// Result cap for document-store `find` and `aggregate`.
    pub max_documents: usize,
    /// Connect timeout for network backends, in seconds.
    pub connect_timeout_secs: u64,
    /// Deadline applied to queries when the caller supplies none.
    pub default_query_timeout_ms: Option<u64>,
    /// History entries retained per connection.
    pub history_capacity: usize,
    /// Apply edits immediately without recording them.
    pub auto_commit: bool,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Connections declared in the config file.
    pub connections: Vec<ConnectionDescriptor>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Schema cache TTL in seconds.
    pub schema_cache_ttl_secs: Option<u64>,
    /// Schema cache capacity.
    pub schema_cache_capacity: Option<usize>,
    /// Document result cap.
    pub max_documents: Option<usize>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Default query timeout in milliseconds.
    pub default_query_timeout_ms: Option<u64>,
    /// History capacity per connection.
    pub history_capacity: Option<usize>,
    /// Auto-commit edits.
    pub auto_commit: Option<bool>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
    /// Declared connections.
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Log file path.
    pub file: Option<PathBuf>,
    /// `EnvFilter` directive.
    pub filter: Option<String>,
}

impl Default for DbkitConfig {
    fn default() -> Self {
        Self {
            schema_cache_ttl_secs: 300,
            schema_cache_capacity: 256,
            max_documents: 1000,
            connect_timeout_secs: 10,
            default_query_timeout_ms: None,
            history_capacity: 500,
            auto_commit: false,
            logging: LoggingConfig::default(),
            connections: Vec::new(),
        }
    }
}

impl DbkitConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml_str(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `DBKIT_CONFIG_PATH` first, then the platform config dir
    /// (`~/.config/dbkit/config.toml` on Linux). Unreadable files are logged
    /// and skipped. Returns defaults if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            match Self::load_from_file(Path::new(&path)) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path, error = %e, "Ignoring unreadable config file"),
            }
        }

        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("dbkit").join("config.toml");
        if platform_config.exists() {
            match Self::load_from_file(&platform_config) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(
                    path = %platform_config.display(),
                    error = %e,
                    "Ignoring unreadable config file"
                ),
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `DbkitConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(v) = file.schema_cache_ttl_secs {
            config.schema_cache_ttl_secs = v;
        }
        if let Some(v) = file.schema_cache_capacity {
            config.schema_cache_capacity = v.max(1);
        }
        if let Some(v) = file.max_documents {
            config.max_documents = v.max(1);
        }
        if let Some(v) = file.connect_timeout_secs {
            config.connect_timeout_secs = v;
        }
        if file.default_query_timeout_ms.is_some() {
            config.default_query_timeout_ms = file.default_query_timeout_ms;
        }
        if let Some(v) = file.history_capacity {
            config.history_capacity = v;
        }
        if let Some(v) = file.auto_commit {
            config.auto_commit = v;
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            if logging.file.is_some() {
                config.logging.file = logging.file;
            }
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
        }
        config.connections = file.connections;

        config
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `DBKIT_SCHEMA_CACHE_TTL_SECS` | `schema_cache_ttl_secs` |
    /// | `DBKIT_SCHEMA_CACHE_CAPACITY` | `schema_cache_capacity` |
    /// | `DBKIT_MAX_DOCUMENTS` | `max_documents` |
    /// | `DBKIT_CONNECT_TIMEOUT_SECS` | `connect_timeout_secs` |
    /// | `DBKIT_QUERY_TIMEOUT_MS` | `default_query_timeout_ms` |
    /// | `DBKIT_HISTORY_CAPACITY` | `history_capacity` |
    /// | `DBKIT_AUTO_COMMIT` | `auto_commit` |
    ///
    /// Logging variables are handled by [`LoggingConfig::with_env_overrides`].
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<u64>("DBKIT_SCHEMA_CACHE_TTL_SECS") {
            self.schema_cache_ttl_secs = v;
        }
        if let Some(v) = env_parse::<usize>("DBKIT_SCHEMA_CACHE_CAPACITY") {
            self.schema_cache_capacity = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("DBKIT_MAX_DOCUMENTS") {
            self.max_documents = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("DBKIT_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DBKIT_QUERY_TIMEOUT_MS") {
            self.default_query_timeout_ms = (v > 0).then_some(v);
        }
        if let Some(v) = env_parse::<usize>("DBKIT_HISTORY_CAPACITY") {
            self.history_capacity = v;
        }
        if let Ok(v) = std::env::var("DBKIT_AUTO_COMMIT") {
            self.auto_commit = v.eq_ignore_ascii_case("true") || v == "1";
        }
        self.logging = self.logging.with_env_overrides();
        self
    }

    /// Returns the schema cache TTL.
    #[must_use]
    pub const fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl_secs)
    }

    /// Returns the connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the default query timeout, if any.
    #[must_use]
    pub fn default_query_timeout(&self) -> Option<Duration> {
        self.default_query_timeout_ms.map(Duration::from_millis)
    }

    /// Sets the schema cache TTL.
    #[must_use]
    pub const fn with_schema_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.schema_cache_ttl_secs = secs;
        self
    }

    /// Sets the document result cap.
    #[must_use]
    pub const fn with_max_documents(mut self, max: usize) -> Self {
        self.max_documents = max;
        self
    }

    /// Sets auto-commit.
    #[must_use]
    pub const fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Looks up a declared connection by id or display name.
    #[must_use]
    pub fn connection(&self, key: &str) -> Option<&ConnectionDescriptor> {
        self.connections
            .iter()
            .find(|c| c.id.as_str() == key)
            .or_else(|| self.connections.iter().find(|c| c.name == key))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendType;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DbkitConfig::default();
        assert_eq!(config.schema_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_documents, 1000);
        assert_eq!(config.history_capacity, 500);
        assert!(!config.auto_commit);
        assert!(config.default_query_timeout().is_none());
    }

    #[test]
    fn test_parse_toml_with_connections() {
        let toml = r#"
            schema_cache_ttl_secs = 60
            max_documents = 50
            default_query_timeout_ms = 2500
            auto_commit = true

            [logging]
            format = "json"
            filter = "dbkit=debug"

            [[connections]]
            id = "local"
            name = "Local file"
            db_type = "sqlite"
            file_path = "/tmp/app.db"

            [[connections]]
            id = "pg"
            name = "Warehouse"
            db_type = "postgresql"
            host = "db.internal"
            username = "reader"
            password = "s3cret"
            database = "warehouse"
        "#;

        let config = DbkitConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.schema_cache_ttl_secs, 60);
        assert_eq!(config.max_documents, 50);
        assert_eq!(config.default_query_timeout(), Some(Duration::from_millis(2500)));
        assert!(config.auto_commit);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter, "dbkit=debug");
        assert_eq!(config.connections.len(), 2);

        let pg = config.connection("Warehouse").unwrap();
        assert_eq!(pg.backend, BackendType::PostgreSql);
        assert_eq!(pg.password(), Some("s3cret"));
        assert!(config.connection("local").is_some());
        assert!(config.connection("missing").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "history_capacity = 7").unwrap();

        let config = DbkitConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.history_capacity, 7);
    }

    #[test]
    fn test_invalid_toml_is_operation_failed() {
        let err = DbkitConfig::from_toml_str("max_documents = \"lots\"").unwrap_err();
        assert!(matches!(err, crate::Error::OperationFailed { ref operation, .. } if operation == "parse_config_file"));
    }

    #[test]
    fn test_unknown_backend_in_file_fails() {
        let toml = r#"
            [[connections]]
            id = "x"
            name = "x"
            db_type = "oracle"
        "#;
        assert!(DbkitConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_missing_file_errors() {
        let result = DbkitConfig::load_from_file(Path::new("/nonexistent/dbkit.toml"));
        assert!(result.is_err());
    }
}
