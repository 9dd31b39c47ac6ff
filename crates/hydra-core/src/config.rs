//! Broker configuration model.
//!
//! Configuration is constructed explicitly (document or environment map) and
//! handed to the manager; nothing in the core reads process state at import
//! time, so tests can isolate every knob.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::adapter::DatabaseType;
use hydra_common::{BrokerError, Result};

/// TLS posture for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SslMode {
    Required,
    #[default]
    Preferred,
    Disabled,
}

impl SslMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "REQUIRED" | "REQUIRE" => Ok(SslMode::Required),
            "PREFERRED" | "PREFER" => Ok(SslMode::Preferred),
            "DISABLED" | "DISABLE" => Ok(SslMode::Disabled),
            other => Err(BrokerError::Configuration(format!(
                "Unknown SSL mode: {}",
                other
            ))),
        }
    }
}

/// TLS material for one pool; `ca`/`cert`/`key` are filesystem paths.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub mode: SslMode,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// One pool entry of the multi-pool document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, rename = "type")]
    pub database_type: Option<DatabaseType>,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ssl: Option<SslConfig>,
    #[serde(default, alias = "connectionLimit")]
    pub connection_limit: Option<u32>,
    #[serde(default, alias = "queueLimit")]
    pub queue_limit: Option<u32>,
    #[serde(default, alias = "idleTimeout")]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default, alias = "connectionTimeout")]
    pub connection_timeout_ms: Option<u64>,
    #[serde(default, alias = "acquireTimeout")]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default, alias = "timeout")]
    pub statement_timeout_ms: Option<u64>,
}

impl ConnectionConfig {
    /// Minimal entry used by the environment loaders before properties land.
    fn empty() -> Self {
        Self {
            database_type: None,
            host: String::new(),
            port: None,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            description: None,
            tags: Vec::new(),
            ssl: None,
            connection_limit: None,
            queue_limit: None,
            idle_timeout_ms: None,
            connection_timeout_ms: None,
            acquire_timeout_ms: None,
            statement_timeout_ms: None,
        }
    }

    /// Effective port, falling back to the engine default when typed.
    pub fn effective_port(&self) -> Option<u16> {
        self.port
            .or_else(|| self.database_type.map(|t| t.default_port()))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BrokerError::Configuration(format!(
                "Connection '{}' is missing a host",
                name
            )));
        }
        if self.user.trim().is_empty() {
            return Err(BrokerError::Configuration(format!(
                "Connection '{}' is missing a user",
                name
            )));
        }
        if self.database.trim().is_empty() {
            return Err(BrokerError::Configuration(format!(
                "Connection '{}' is missing a database",
                name
            )));
        }
        Ok(())
    }
}

/// Pool sizing resolved from a connection entry plus factory defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub idle_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl PoolSettings {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            min_connections: 2,
            max_connections: config.connection_limit.unwrap_or(10),
            idle_timeout_ms: config.idle_timeout_ms.unwrap_or(300_000),
            acquire_timeout_ms: config.acquire_timeout_ms.unwrap_or(60_000),
        }
    }
}

/// Retry surface handed to adapters.
///
/// Constructed with the factory defaults but intentionally unengaged in the
/// query path; SELECTs against read-only pools surface their first error.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub retries: u32,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            min_timeout_ms: 1_000,
            max_timeout_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        if attempt == 0 {
            return std::time::Duration::from_millis(self.min_timeout_ms);
        }
        let delay_ms =
            (self.min_timeout_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        std::time::Duration::from_millis((delay_ms as u64).min(self.max_timeout_ms))
    }
}

/// Admission and execution bounds shared by validator and executor.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_query_length", alias = "maxQueryLength")]
    pub max_query_length: usize,
    #[serde(default = "default_max_execution_time", alias = "maxExecutionTime")]
    pub max_execution_time_ms: u64,
    #[serde(default = "default_max_result_rows", alias = "maxResultRows")]
    pub max_result_rows: usize,
    #[serde(default = "default_allowed_operations", alias = "allowedOperations")]
    pub allowed_operations: Vec<String>,
    #[serde(default = "default_true", alias = "enableAudit")]
    pub enable_audit: bool,
}

fn default_max_query_length() -> usize {
    10_000
}

fn default_max_execution_time() -> u64 {
    30_000
}

fn default_max_result_rows() -> usize {
    10_000
}

fn default_allowed_operations() -> Vec<String> {
    ["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "ANALYZE", "WITH"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_query_length: default_max_query_length(),
            max_execution_time_ms: default_max_execution_time(),
            max_result_rows: default_max_result_rows(),
            allowed_operations: default_allowed_operations(),
            enable_audit: true,
        }
    }
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
    #[serde(default, alias = "defaultConnection")]
    pub default_connection: Option<String>,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Environment properties recognized on `DB_<NAME>_<PROPERTY>` variables,
/// longest suffix first so `CONNECTION_TIMEOUT` wins over `TIMEOUT`-like
/// collisions in pool names.
const ENV_PROPERTIES: [&str; 14] = [
    "CONNECTION_TIMEOUT",
    "CONNECTION_LIMIT",
    "IDLE_TIMEOUT",
    "DESCRIPTION",
    "SSL_MODE",
    "PASSWORD",
    "DATABASE",
    "SSL_CA",
    "HOST",
    "PORT",
    "USER",
    "TYPE",
    "TAGS",
    "DB",
];

impl BrokerConfig {
    /// Parses the multi-pool JSON document
    /// `{connections: {name -> entry}, defaultConnection?}`.
    pub fn from_document(document: &JsonValue) -> Result<Self> {
        let config: BrokerConfig = serde_json::from_value(document.clone())
            .map_err(|e| BrokerError::Configuration(format!("Invalid config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `DB_<NAME>_<PROPERTY>` variables.
    ///
    /// The variable map is passed explicitly; callers wanting process state
    /// use [`BrokerConfig::from_process_env`].
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = BrokerConfig::default();

        for (key, value) in vars {
            if key == "DB_DEFAULT_CONNECTION" {
                config.default_connection = Some(value.to_lowercase());
                continue;
            }
            let Some(rest) = key.strip_prefix("DB_") else {
                continue;
            };
            let Some((name, property)) = split_env_key(rest) else {
                continue;
            };
            let entry = config
                .connections
                .entry(name.to_lowercase())
                .or_insert_with(ConnectionConfig::empty);
            apply_env_property(entry, property, value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Legacy single-pool variables (`MYSQL_*`, `POSTGRES_*`) mapped to
    /// synthetic pools named `mysql` and `postgresql`.
    pub fn from_legacy_env_map(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = BrokerConfig::default();

        for (prefix, name, db_type) in [
            ("MYSQL_", "mysql", DatabaseType::MySql),
            ("POSTGRES_", "postgresql", DatabaseType::PostgreSql),
        ] {
            let mut entry = ConnectionConfig::empty();
            entry.database_type = Some(db_type);
            let mut any = false;
            for (key, value) in vars {
                let Some(property) = key.strip_prefix(prefix) else {
                    continue;
                };
                if apply_env_property(&mut entry, property, value).is_ok() {
                    any = true;
                }
            }
            if any {
                config.connections.insert(name.to_string(), entry);
            }
        }

        if config.connections.is_empty() {
            return Err(BrokerError::Configuration(
                "No legacy database variables found".to_string(),
            ));
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads the process environment (multi-pool mapping plus
    /// `DB_DEFAULT_CONNECTION`).
    pub fn from_process_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Rejects contradictory or incomplete documents; fatal at startup.
    pub fn validate(&self) -> Result<()> {
        for (name, entry) in &self.connections {
            entry.validate(name)?;
        }
        if let Some(default) = &self.default_connection {
            if !self.connections.is_empty() && !self.connections.contains_key(default) {
                return Err(BrokerError::Configuration(format!(
                    "Default connection '{}' is not a configured pool",
                    default
                )));
            }
        }
        Ok(())
    }

    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Splits `<NAME>_<PROPERTY>` by matching a known property suffix; pool
/// names may themselves contain underscores.
fn split_env_key(rest: &str) -> Option<(&str, &str)> {
    for property in ENV_PROPERTIES {
        if let Some(name) = rest.strip_suffix(property) {
            let name = name.strip_suffix('_')?;
            if !name.is_empty() {
                return Some((name, property));
            }
        }
    }
    None
}

fn apply_env_property(entry: &mut ConnectionConfig, property: &str, value: &str) -> Result<()> {
    match property {
        "HOST" => entry.host = value.to_string(),
        "PORT" => {
            entry.port = Some(value.parse().map_err(|_| {
                BrokerError::Configuration(format!("Invalid port value: {}", value))
            })?)
        }
        "USER" => entry.user = value.to_string(),
        "PASSWORD" => entry.password = value.to_string(),
        "DATABASE" | "DB" => entry.database = value.to_string(),
        "TYPE" => entry.database_type = Some(value.parse()?),
        "DESCRIPTION" => entry.description = Some(value.to_string()),
        "TAGS" => {
            entry.tags = value
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        }
        "SSL_MODE" => {
            let mode = SslMode::parse(value)?;
            entry.ssl.get_or_insert_with(SslConfig::default).mode = mode;
        }
        "SSL_CA" => {
            entry.ssl.get_or_insert_with(SslConfig::default).ca = Some(value.to_string());
        }
        "CONNECTION_TIMEOUT" => {
            entry.connection_timeout_ms = Some(value.parse().map_err(|_| {
                BrokerError::Configuration(format!("Invalid timeout value: {}", value))
            })?)
        }
        "CONNECTION_LIMIT" => {
            entry.connection_limit = Some(value.parse().map_err(|_| {
                BrokerError::Configuration(format!("Invalid connection limit: {}", value))
            })?)
        }
        "IDLE_TIMEOUT" => {
            entry.idle_timeout_ms = Some(value.parse().map_err(|_| {
                BrokerError::Configuration(format!("Invalid idle timeout: {}", value))
            })?)
        }
        other => {
            return Err(BrokerError::Configuration(format!(
                "Unknown connection property: {}",
                other
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_parsing() {
        let document = json!({
            "connections": {
                "analytics": {
                    "type": "postgresql",
                    "host": "pg.internal",
                    "port": 5432,
                    "user": "reader",
                    "password": "secret",
                    "database": "analytics",
                    "tags": ["reporting"],
                    "connectionLimit": 20
                }
            },
            "defaultConnection": "analytics"
        });

        let config = BrokerConfig::from_document(&document).unwrap();
        assert_eq!(config.default_connection.as_deref(), Some("analytics"));
        let entry = &config.connections["analytics"];
        assert_eq!(entry.database_type, Some(DatabaseType::PostgreSql));
        assert_eq!(entry.connection_limit, Some(20));
        assert_eq!(entry.tags, vec!["reporting"]);
    }

    #[test]
    fn test_document_rejects_unknown_default() {
        let document = json!({
            "connections": {
                "main": {"host": "h", "user": "u", "database": "d"}
            },
            "defaultConnection": "missing"
        });
        assert!(BrokerConfig::from_document(&document).is_err());
    }

    #[test]
    fn test_env_mapping_basic() {
        let vars: HashMap<String, String> = [
            ("DB_ORDERS_HOST", "mysql.internal"),
            ("DB_ORDERS_PORT", "3306"),
            ("DB_ORDERS_USER", "reader"),
            ("DB_ORDERS_PASSWORD", "pw"),
            ("DB_ORDERS_DATABASE", "orders"),
            ("DB_ORDERS_TAGS", "oltp, primary"),
            ("DB_DEFAULT_CONNECTION", "orders"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = BrokerConfig::from_env_map(&vars).unwrap();
        assert_eq!(config.default_connection.as_deref(), Some("orders"));
        let entry = &config.connections["orders"];
        assert_eq!(entry.host, "mysql.internal");
        assert_eq!(entry.port, Some(3306));
        assert_eq!(entry.tags, vec!["oltp", "primary"]);
    }

    #[test]
    fn test_env_mapping_pool_name_with_underscores() {
        let vars: HashMap<String, String> = [
            ("DB_LEGACY_CRM_HOST", "crm.internal"),
            ("DB_LEGACY_CRM_USER", "reader"),
            ("DB_LEGACY_CRM_DB", "crm"),
            ("DB_LEGACY_CRM_IDLE_TIMEOUT", "60000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = BrokerConfig::from_env_map(&vars).unwrap();
        let entry = &config.connections["legacy_crm"];
        assert_eq!(entry.host, "crm.internal");
        assert_eq!(entry.database, "crm");
        assert_eq!(entry.idle_timeout_ms, Some(60_000));
    }

    #[test]
    fn test_env_ssl_properties() {
        let vars: HashMap<String, String> = [
            ("DB_SECURE_HOST", "db.internal"),
            ("DB_SECURE_USER", "reader"),
            ("DB_SECURE_DATABASE", "app"),
            ("DB_SECURE_SSL_MODE", "REQUIRED"),
            ("DB_SECURE_SSL_CA", "/etc/ssl/ca.pem"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = BrokerConfig::from_env_map(&vars).unwrap();
        let ssl = config.connections["secure"].ssl.as_ref().unwrap();
        assert_eq!(ssl.mode, SslMode::Required);
        assert_eq!(ssl.ca.as_deref(), Some("/etc/ssl/ca.pem"));
    }

    #[test]
    fn test_legacy_env_mapping() {
        let vars: HashMap<String, String> = [
            ("MYSQL_HOST", "localhost"),
            ("MYSQL_USER", "root"),
            ("MYSQL_PASSWORD", "pw"),
            ("MYSQL_DATABASE", "app"),
            ("POSTGRES_HOST", "localhost"),
            ("POSTGRES_USER", "postgres"),
            ("POSTGRES_DB", "app"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = BrokerConfig::from_legacy_env_map(&vars).unwrap();
        assert_eq!(config.connections.len(), 2);
        assert_eq!(
            config.connections["mysql"].database_type,
            Some(DatabaseType::MySql)
        );
        assert_eq!(
            config.connections["postgresql"].database_type,
            Some(DatabaseType::PostgreSql)
        );
    }

    #[test]
    fn test_pool_settings_defaults() {
        let entry = ConnectionConfig::empty();
        let pool = PoolSettings::from_config(&entry);
        assert_eq!(
            pool,
            PoolSettings {
                min_connections: 2,
                max_connections: 10,
                idle_timeout_ms: 300_000,
                acquire_timeout_ms: 60_000,
            }
        );
    }

    #[test]
    fn test_pool_settings_respect_overrides() {
        let mut entry = ConnectionConfig::empty();
        entry.connection_limit = Some(25);
        entry.idle_timeout_ms = Some(1_000);
        let pool = PoolSettings::from_config(&entry);
        assert_eq!(pool.max_connections, 25);
        assert_eq!(pool.idle_timeout_ms, 1_000);
    }

    #[test]
    fn test_retry_defaults_and_backoff() {
        let retry = RetryConfig::default();
        assert_eq!(retry.retries, 3);
        assert_eq!(
            retry.delay_for_attempt(0),
            std::time::Duration::from_millis(1_000)
        );
        assert_eq!(
            retry.delay_for_attempt(1),
            std::time::Duration::from_millis(2_000)
        );
        // Capped at max_timeout_ms
        assert_eq!(
            retry.delay_for_attempt(5),
            std::time::Duration::from_millis(5_000)
        );
    }

    #[test]
    fn test_security_defaults() {
        let security = SecurityConfig::default();
        assert_eq!(security.max_query_length, 10_000);
        assert_eq!(security.max_execution_time_ms, 30_000);
        assert_eq!(security.max_result_rows, 10_000);
        assert!(security.allowed_operations.contains(&"WITH".to_string()));
        assert!(security.enable_audit);
    }

    #[test]
    fn test_validation_rejects_missing_host() {
        let document = json!({
            "connections": {
                "bad": {"host": "", "user": "u", "database": "d"}
            }
        });
        match BrokerConfig::from_document(&document) {
            Err(BrokerError::Configuration(msg)) => assert!(msg.contains("host")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_effective_port_from_type() {
        let mut entry = ConnectionConfig::empty();
        entry.database_type = Some(DatabaseType::PostgreSql);
        assert_eq!(entry.effective_port(), Some(5432));
        entry.port = Some(6432);
        assert_eq!(entry.effective_port(), Some(6432));
    }
}
