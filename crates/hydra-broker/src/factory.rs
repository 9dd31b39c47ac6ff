//! Adapter construction with database-type detection.
//!
//! Type resolution precedence: explicit config type, then well-known port,
//! then host substring, then the MySQL default. Each registered engine
//! carries an availability probe so a build without one driver fails with a
//! clear message instead of a dangling pool.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use hydra_common::{BrokerError, Result};
use hydra_core::adapter::{DatabaseAdapter, DatabaseType};
use hydra_core::config::{ConnectionConfig, RetryConfig};
use hydra_mysql::MySqlAdapter;
use hydra_postgres::PgAdapter;

/// Resolves the engine for a pool entry.
///
/// Precedence: explicit `type` > port 3306/5432 > host substring
/// (`mysql`/`postgres`) > default `mysql`.
pub fn resolve_database_type(config: &ConnectionConfig) -> DatabaseType {
    if let Some(explicit) = config.database_type {
        return explicit;
    }
    match config.port {
        Some(3306) => return DatabaseType::MySql,
        Some(5432) => return DatabaseType::PostgreSql,
        _ => {}
    }
    let host = config.host.to_lowercase();
    if host.contains("mysql") {
        DatabaseType::MySql
    } else if host.contains("postgres") {
        DatabaseType::PostgreSql
    } else {
        DatabaseType::MySql
    }
}

type AvailabilityProbe = Box<dyn Fn() -> bool + Send + Sync>;

/// Builds adapters for resolved engine types.
pub struct AdapterFactory {
    registrations: HashMap<DatabaseType, AvailabilityProbe>,
    retry: RetryConfig,
}

impl AdapterFactory {
    /// A factory with both bundled drivers registered and available.
    pub fn new() -> Self {
        let mut registrations: HashMap<DatabaseType, AvailabilityProbe> = HashMap::new();
        registrations.insert(DatabaseType::MySql, Box::new(|| true));
        registrations.insert(DatabaseType::PostgreSql, Box::new(|| true));
        Self {
            registrations,
            retry: RetryConfig::default(),
        }
    }

    /// Replaces the availability probe for one engine.
    pub fn register(
        &mut self,
        database_type: DatabaseType,
        probe: impl Fn() -> bool + Send + Sync + 'static,
    ) {
        self.registrations.insert(database_type, Box::new(probe));
    }

    /// Removes an engine registration entirely.
    pub fn unregister(&mut self, database_type: DatabaseType) {
        self.registrations.remove(&database_type);
    }

    /// Builds an adapter for `config`, applying the resolution precedence
    /// and availability probe.
    pub fn create(&self, config: ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>> {
        let database_type = resolve_database_type(&config);
        debug!(%database_type, host = %config.host, "Resolved adapter type");

        let probe = self.registrations.get(&database_type).ok_or_else(|| {
            BrokerError::Unsupported(database_type.as_str().to_string())
        })?;
        if !probe() {
            return Err(BrokerError::NotFound(format!(
                "Database driver for {} is not available",
                database_type
            )));
        }

        Ok(match database_type {
            DatabaseType::MySql => {
                Arc::new(MySqlAdapter::with_retry(config, self.retry.clone())?)
            }
            DatabaseType::PostgreSql => {
                Arc::new(PgAdapter::with_retry(config, self.retry.clone())?)
            }
        })
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}
