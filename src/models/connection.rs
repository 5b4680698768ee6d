//! Connection descriptors and backend tags.

use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Opaque identifier of a stored connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Closed set of supported backend kinds.
///
/// Every variant maps to exactly one connector implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
    /// PostgreSQL (relational, `information_schema` introspection).
    #[serde(rename = "postgresql", alias = "postgres")]
    PostgreSql,
    /// MySQL or MariaDB (relational, backtick identifiers).
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql,
    /// `SQLite` database file.
    #[serde(rename = "sqlite")]
    Sqlite,
    /// MongoDB document store driven by shell syntax.
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl BackendType {
    /// Returns every backend tag.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::PostgreSql, Self::MySql, Self::Sqlite, Self::MongoDb]
    }

    /// Returns the wire name of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PostgreSql => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::MongoDb => "mongodb",
        }
    }

    /// Returns the conventional server port, if the backend has one.
    #[must_use]
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::PostgreSql => Some(5432),
            Self::MySql => Some(3306),
            Self::Sqlite => None,
            Self::MongoDb => Some(27017),
        }
    }

    /// Returns true for the SQL-family backends.
    #[must_use]
    pub const fn is_sql(self) -> bool {
        !matches!(self, Self::MongoDb)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Self::PostgreSql),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            "mongodb" => Ok(Self::MongoDb),
            _ => Err(Error::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Everything needed to reach one backend.
///
/// Owned by the connection store; the core only borrows it for the length of
/// an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Stable identity.
    pub id: ConnectionId,
    /// Display name.
    pub name: String,
    /// Which connector handles this connection.
    #[serde(rename = "db_type")]
    pub backend: BackendType,
    /// Server host.
    #[serde(default)]
    pub host: Option<String>,
    /// Server port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login user.
    #[serde(default)]
    pub username: Option<String>,
    /// Login password.
    #[serde(default, with = "optional_secret_serde")]
    pub password: Option<SecretString>,
    /// Database (or default logical database for the document store).
    #[serde(default)]
    pub database: Option<String>,
    /// Database file for the embedded backend.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl ConnectionDescriptor {
    /// Creates a descriptor with no address fields set.
    #[must_use]
    pub fn new(id: impl Into<ConnectionId>, name: impl Into<String>, backend: BackendType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            backend,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            file_path: None,
        }
    }

    /// Creates a descriptor for a `SQLite` file.
    #[must_use]
    pub fn sqlite(id: impl Into<ConnectionId>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| "sqlite".to_string(), |n| n.to_string_lossy().to_string());
        Self {
            file_path: Some(path),
            ..Self::new(id, name, BackendType::Sqlite)
        }
    }

    /// Sets host and port.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    /// Sets login credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Returns the host, defaulting to localhost.
    #[must_use]
    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    /// Returns the port, defaulting to the backend's conventional port.
    #[must_use]
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| self.backend.default_port())
    }

    /// Returns the password in clear text.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(ExposeSecret::expose_secret)
    }

    /// Returns a credential-free address suitable for logs.
    #[must_use]
    pub fn address(&self) -> String {
        if let Some(path) = &self.file_path {
            return path.display().to_string();
        }
        let mut address = self.host_or_default().to_string();
        if let Some(port) = self.port_or_default() {
            address.push_str(&format!(":{port}"));
        }
        if let Some(db) = &self.database {
            address.push('/');
            address.push_str(db);
        }
        address
    }
}

/// Serde module for optional `SecretString` fields.
mod optional_secret_serde {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match secret {
            Some(_) => serializer.serialize_some("***REDACTED***"),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.map(SecretString::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parse() {
        assert_eq!("postgresql".parse::<BackendType>().ok(), Some(BackendType::PostgreSql));
        assert_eq!("MariaDB".parse::<BackendType>().ok(), Some(BackendType::MySql));
        assert_eq!(" sqlite ".parse::<BackendType>().ok(), Some(BackendType::Sqlite));
        assert_eq!("mongodb".parse::<BackendType>().ok(), Some(BackendType::MongoDb));
    }

    #[test]
    fn test_backend_type_unknown_is_construction_error() {
        for tag in ["oracle", "", "redis", "mssql"] {
            let err = tag.parse::<BackendType>().unwrap_err();
            assert!(matches!(err, Error::UnsupportedBackend(ref t) if t == tag));
        }
    }

    #[test]
    fn test_backend_type_roundtrips_wire_name() {
        for backend in BackendType::all() {
            assert_eq!(backend.as_str().parse::<BackendType>().ok(), Some(backend));
        }
    }

    #[test]
    fn test_descriptor_address_hides_password() {
        let descriptor = ConnectionDescriptor::new("c1", "prod", BackendType::PostgreSql)
            .with_host("db.internal", None)
            .with_credentials("app", "hunter2")
            .with_database("orders");

        assert_eq!(descriptor.address(), "db.internal:5432/orders");
        assert_eq!(descriptor.password(), Some("hunter2"));
        assert!(!format!("{descriptor:?}").contains("hunter2"));
    }

    #[test]
    fn test_descriptor_deserialize_from_json() {
        let json = r#"{
            "id": "abc",
            "name": "local",
            "db_type": "mariadb",
            "host": "127.0.0.1",
            "password": "secret"
        }"#;
        let descriptor: ConnectionDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.backend, BackendType::MySql);
        assert_eq!(descriptor.port_or_default(), Some(3306));
        assert_eq!(descriptor.password(), Some("secret"));

        let out = serde_json::to_string(&descriptor).unwrap();
        assert!(!out.contains("secret"));
        assert!(out.contains("REDACTED"));
    }

    #[test]
    fn test_sqlite_descriptor_uses_file_name() {
        let descriptor = ConnectionDescriptor::sqlite("s1", "/tmp/app.db");
        assert_eq!(descriptor.name, "app.db");
        assert_eq!(descriptor.address(), "/tmp/app.db");
        assert_eq!(descriptor.port_or_default(), None);
    }
}
