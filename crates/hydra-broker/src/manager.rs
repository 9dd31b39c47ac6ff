//! Named registry of adapter instances.
//!
//! The manager owns the pool fleet: concurrent connect/disconnect sweeps,
//! default-pool resolution, fan-out health checks, and tag/type filtering.
//! The registry is read-mostly after `connect_all`; only default selection
//! and manager-level lifecycle mutate it.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use hydra_common::{BrokerError, Result};
use hydra_core::adapter::{DatabaseAdapter, DatabaseType, HealthStatus};
use hydra_core::config::{BrokerConfig, ConnectionConfig};

use crate::factory::AdapterFactory;

/// Aggregate registry statistics for the `list_databases` block.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    pub total_connections: usize,
    /// Optimistic count: pools currently registered. Precise liveness comes
    /// from `health_check_all`.
    pub healthy_connections: usize,
    pub by_type: HashMap<String, usize>,
    pub by_tag: HashMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_connection: Option<String>,
}

/// Fan-out health outcome plus the aggregate summary.
#[derive(Debug, Clone, Serialize)]
pub struct FleetHealth {
    pub databases: HashMap<String, HealthStatus>,
    pub healthy_databases: usize,
    /// Mean over every probe; failed probes contribute 0 ms.
    pub average_response_time_ms: f64,
}

/// The named fleet of adapters.
pub struct ConnectionManager {
    adapters: DashMap<String, Arc<dyn DatabaseAdapter>>,
    configs: DashMap<String, ConnectionConfig>,
    default_connection: RwLock<Option<String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
            configs: DashMap::new(),
            default_connection: RwLock::new(None),
        }
    }

    /// Builds the fleet from configuration via the factory. Adapters are
    /// constructed but not yet connected.
    pub fn from_config(config: &BrokerConfig, factory: &AdapterFactory) -> Result<Self> {
        let manager = Self::new();
        for (name, entry) in &config.connections {
            let adapter = factory.create(entry.clone()).map_err(|e| {
                BrokerError::Configuration(format!(
                    "Failed to create adapter for '{}': {}",
                    name, e
                ))
            })?;
            manager.register(name, entry.clone(), adapter);
        }
        if let Some(default) = &config.default_connection {
            manager.set_default_connection(default)?;
        }
        Ok(manager)
    }

    /// Registers one pool. Used by `from_config` and by tests injecting
    /// stub adapters.
    pub fn register(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
        adapter: Arc<dyn DatabaseAdapter>,
    ) {
        let name = name.into();
        self.configs.insert(name.clone(), config);
        self.adapters.insert(name, adapter);
    }

    /// Connects every adapter concurrently. Any failure fails the call with
    /// a message naming the offending pool; already-connected adapters are
    /// left as-is (the caller owns cleanup via `disconnect_all`).
    #[instrument(skip(self))]
    pub async fn connect_all(&self) -> Result<()> {
        let entries: Vec<(String, Arc<dyn DatabaseAdapter>)> = self
            .adapters
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let outcomes = join_all(entries.iter().map(|(name, adapter)| {
            let name = name.clone();
            let adapter = Arc::clone(adapter);
            async move { (name, adapter.connect().await) }
        }))
        .await;

        for (name, outcome) in outcomes {
            if let Err(cause) = outcome {
                error!(pool = %name, %cause, "Pool failed to connect");
                return Err(BrokerError::Connection(format!(
                    "Failed to connect database '{}': {}",
                    name, cause
                )));
            }
        }
        info!(pools = entries.len(), "All pools connected");
        Ok(())
    }

    /// Disconnects every adapter concurrently. Individual failures are
    /// logged but never abort the sweep; the registry is cleared afterwards.
    #[instrument(skip(self))]
    pub async fn disconnect_all(&self) {
        let entries: Vec<(String, Arc<dyn DatabaseAdapter>)> = self
            .adapters
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let outcomes = join_all(entries.iter().map(|(name, adapter)| {
            let name = name.clone();
            let adapter = Arc::clone(adapter);
            async move { (name, adapter.disconnect().await) }
        }))
        .await;

        for (name, outcome) in outcomes {
            if let Err(cause) = outcome {
                warn!(pool = %name, %cause, "Pool failed to disconnect cleanly");
            }
        }

        self.adapters.clear();
        self.configs.clear();
        *self.default_connection.write() = None;
        info!("Registry cleared");
    }

    /// Resolves an optional pool name against the default selection,
    /// verifying the pool exists.
    pub fn resolve_name(&self, name: Option<&str>) -> Result<String> {
        let resolved = match name {
            Some(name) => name.to_string(),
            None => self.default_connection.read().clone().ok_or_else(|| {
                BrokerError::NotFound(
                    "No connection name specified and no default connection configured"
                        .to_string(),
                )
            })?,
        };

        if self.adapters.contains_key(&resolved) {
            Ok(resolved)
        } else {
            Err(BrokerError::NotFound(format!(
                "Database connection '{}' not found. Available: {}",
                resolved,
                self.connection_names().join(", ")
            )))
        }
    }

    /// Resolves `name`, falling back to the default pool.
    pub fn get_connection(&self, name: Option<&str>) -> Result<Arc<dyn DatabaseAdapter>> {
        let resolved = self.resolve_name(name)?;
        self.adapters
            .get(&resolved)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                BrokerError::NotFound(format!(
                    "Database connection '{}' not found. Available: {}",
                    resolved,
                    self.connection_names().join(", ")
                ))
            })
    }

    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn connection_config(&self, name: &str) -> Option<ConnectionConfig> {
        self.configs.get(name).map(|entry| entry.value().clone())
    }

    pub fn default_connection(&self) -> Option<String> {
        self.default_connection.read().clone()
    }

    /// Sets the default pool; unknown names are rejected.
    pub fn set_default_connection(&self, name: &str) -> Result<()> {
        if !self.adapters.contains_key(name) {
            return Err(BrokerError::NotFound(format!(
                "Database connection '{}' not found. Available: {}",
                name,
                self.connection_names().join(", ")
            )));
        }
        *self.default_connection.write() = Some(name.to_string());
        Ok(())
    }

    /// Probes every pool in parallel. Probe failures become unhealthy
    /// entries so one bad pool never hides the others.
    #[instrument(skip(self))]
    pub async fn health_check_all(&self) -> FleetHealth {
        let entries: Vec<(String, Arc<dyn DatabaseAdapter>)> = self
            .adapters
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let outcomes = join_all(entries.iter().map(|(name, adapter)| {
            let name = name.clone();
            let adapter = Arc::clone(adapter);
            async move { (name, adapter.health_check().await) }
        }))
        .await;

        let mut databases = HashMap::with_capacity(outcomes.len());
        for (name, outcome) in outcomes {
            let status = match outcome {
                Ok(status) => status,
                Err(error) => HealthStatus::unhealthy(error.to_string()),
            };
            databases.insert(name, status);
        }

        let healthy_databases = databases.values().filter(|s| s.is_healthy).count();
        let average_response_time_ms = if databases.is_empty() {
            0.0
        } else {
            databases
                .values()
                .map(|s| s.response_time_ms as f64)
                .sum::<f64>()
                / databases.len() as f64
        };

        FleetHealth {
            databases,
            healthy_databases,
            average_response_time_ms,
        }
    }

    /// Pools whose configured tags include `tag`.
    pub fn connections_by_tag(&self, tag: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .configs
            .iter()
            .filter(|entry| entry.value().tags.iter().any(|t| t == tag))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Connected pools of one engine type.
    pub fn connections_by_type(&self, database_type: DatabaseType) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .iter()
            .filter(|entry| {
                entry.value().database_type() == database_type
                    && entry.value().connection_status().is_connected
            })
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn statistics(&self) -> ManagerStatistics {
        let mut by_type: HashMap<String, usize> = HashMap::new();
        for entry in self.adapters.iter() {
            *by_type
                .entry(entry.value().database_type().as_str().to_string())
                .or_default() += 1;
        }

        let mut by_tag: HashMap<String, usize> = HashMap::new();
        for entry in self.configs.iter() {
            for tag in &entry.value().tags {
                *by_tag.entry(tag.clone()).or_default() += 1;
            }
        }

        ManagerStatistics {
            total_connections: self.adapters.len(),
            healthy_connections: self.adapters.len(),
            by_type,
            by_tag,
            default_connection: self.default_connection(),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
