//! PostgreSQL adapter: pool lifecycle, parameterized execution,
//! transactions, and health probing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::ConnectOptions;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use hydra_common::{BrokerError, Result};
use hydra_core::adapter::{
    AdapterEvent, AdapterMetrics, AdapterState, ConnectionInfo, ConnectionStatus, DatabaseAdapter,
    DatabaseType, HealthStatus,
};
use hydra_core::config::{ConnectionConfig, PoolSettings, RetryConfig, SslMode};
use hydra_core::profile::DataProfiler;
use hydra_core::result::{QueryResult, SqlStatement};
use hydra_core::schema::SchemaAnalyzer;
use hydra_core::value::SqlValue;

use crate::profiler::PgDataProfiler;
use crate::schema::PgSchemaAnalyzer;
use crate::values::{bind_value, fields_from_rows, row_to_broker};

/// Shared handle to the pool slot, read by the analyzer and profiler.
pub(crate) struct PoolHolder {
    inner: RwLock<Option<PgPool>>,
}

impl PoolHolder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(None),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests() -> Arc<Self> {
        Self::new()
    }

    pub(crate) fn get(&self) -> Result<PgPool> {
        self.inner
            .read()
            .clone()
            .ok_or_else(|| BrokerError::Connection("adapter is not connected".to_string()))
    }

    fn set(&self, pool: PgPool) {
        *self.inner.write() = Some(pool);
    }

    fn take(&self) -> Option<PgPool> {
        self.inner.write().take()
    }

    fn gauges(&self) -> (u32, u32) {
        match self.inner.read().as_ref() {
            Some(pool) => (pool.size(), pool.num_idle() as u32),
            None => (0, 0),
        }
    }
}

/// The PostgreSQL implementation of the adapter contract.
pub struct PgAdapter {
    config: ConnectionConfig,
    pool_settings: PoolSettings,
    #[allow(dead_code)]
    retry: RetryConfig,
    state: Arc<AdapterState>,
    pool: Arc<PoolHolder>,
    analyzer: Arc<PgSchemaAnalyzer>,
    profiler: Arc<PgDataProfiler>,
}

impl PgAdapter {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_retry(config, RetryConfig::default())
    }

    pub fn with_retry(config: ConnectionConfig, retry: RetryConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "PostgreSQL adapter requires a host".to_string(),
            ));
        }
        let port = config.effective_port().unwrap_or(5432);
        let adapter_id = format!("postgresql-{}-{}-{}", config.host, port, config.database);
        let pool_settings = PoolSettings::from_config(&config);
        let pool = PoolHolder::new();
        let analyzer = Arc::new(PgSchemaAnalyzer::new(Arc::clone(&pool)));
        let profiler = Arc::new(PgDataProfiler::new(Arc::clone(&pool)));
        Ok(Self {
            state: AdapterState::new(adapter_id, DatabaseType::PostgreSql),
            config,
            pool_settings,
            retry,
            pool,
            analyzer,
            profiler,
        })
    }

    fn port(&self) -> u16 {
        self.config.effective_port().unwrap_or(5432)
    }

    fn connect_options(&self) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.port())
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database);

        if let Some(ssl) = &self.config.ssl {
            options = options.ssl_mode(match ssl.mode {
                SslMode::Required => PgSslMode::VerifyCa,
                SslMode::Preferred => PgSslMode::Prefer,
                SslMode::Disabled => PgSslMode::Disable,
            });
            if let Some(ca) = &ssl.ca {
                options = options.ssl_root_cert(std::path::Path::new(ca));
            }
            if let Some(cert) = &ssl.cert {
                options = options.ssl_client_cert(std::path::Path::new(cert));
            }
            if let Some(key) = &ssl.key {
                options = options.ssl_client_key(std::path::Path::new(key));
            }
        }

        if let Some(timeout_ms) = self.config.statement_timeout_ms {
            options = options.options([("statement_timeout", timeout_ms.to_string())]);
        }

        options = options.disable_statement_logging();
        Ok(options)
    }

    async fn run_statement(
        &self,
        pool: &PgPool,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<QueryResult, sqlx::Error> {
        let started = Instant::now();
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        }
        let driver_rows = query.fetch_all(pool).await?;
        let fields = fields_from_rows(&driver_rows);
        let rows = driver_rows.iter().map(row_to_broker).collect();
        Ok(QueryResult::with_rows(
            rows,
            fields,
            started.elapsed().as_millis() as u64,
        ))
    }
}

#[async_trait]
impl DatabaseAdapter for PgAdapter {
    fn adapter_id(&self) -> String {
        self.state.adapter_id().to_string()
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSql
    }

    #[instrument(skip(self), fields(adapter_id = %self.state.adapter_id()))]
    async fn connect(&self) -> Result<()> {
        if self.state.is_connected() {
            warn!("connect() called on an already-connected adapter");
            return Ok(());
        }

        let options = self.connect_options()?;
        let pool = PgPoolOptions::new()
            .min_connections(self.pool_settings.min_connections)
            .max_connections(self.pool_settings.max_connections)
            .acquire_timeout(Duration::from_millis(self.pool_settings.acquire_timeout_ms))
            .idle_timeout(Duration::from_millis(self.pool_settings.idle_timeout_ms))
            .connect_lazy_with(options);

        let ping = async {
            let mut conn = pool.acquire().await?;
            sqlx::Connection::ping(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        if let Err(error) = ping {
            pool.close().await;
            return Err(BrokerError::Connection(format!(
                "connection failed: {}",
                error
            )));
        }

        self.pool.set(pool);
        self.state.mark_connected();
        info!("PostgreSQL adapter connected");
        Ok(())
    }

    #[instrument(skip(self), fields(adapter_id = %self.state.adapter_id()))]
    async fn disconnect(&self) -> Result<()> {
        self.state.begin_shutdown();
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.state.mark_disconnected();
        info!("PostgreSQL adapter disconnected");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.state.ensure_ready()?;
        let pool = self.pool.get()?;
        let guard = self.state.begin_query();

        match self.run_statement(&pool, sql, params).await {
            Ok(mut result) => {
                let elapsed = guard.success(result.row_count);
                result.execution_time_ms = elapsed;
                Ok(result)
            }
            Err(error) => {
                let broker_error = BrokerError::from(error);
                guard.failure(&broker_error.to_string());
                Err(broker_error)
            }
        }
    }

    async fn transaction(&self, statements: &[SqlStatement]) -> Result<Vec<QueryResult>> {
        self.state.ensure_ready()?;
        let pool = self.pool.get()?;
        let guard = self.state.begin_query();

        let mut conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(error) => {
                let broker_error = BrokerError::from(error);
                guard.failure(&broker_error.to_string());
                return Err(broker_error);
            }
        };

        let outcome = async {
            sqlx::query("BEGIN").execute(&mut *conn).await?;
            let mut results = Vec::with_capacity(statements.len());
            for statement in statements {
                let started = Instant::now();
                let mut query = sqlx::query(&statement.sql);
                for param in &statement.params {
                    query = bind_value(query, param)
                        .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
                }
                let driver_rows = query.fetch_all(&mut *conn).await?;
                let fields = fields_from_rows(&driver_rows);
                let rows: Vec<_> = driver_rows.iter().map(row_to_broker).collect();
                results.push(QueryResult::with_rows(
                    rows,
                    fields,
                    started.elapsed().as_millis() as u64,
                ));
            }
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(results)
        }
        .await;

        match outcome {
            Ok(results) => {
                let total: usize = results.iter().map(|r| r.row_count).sum();
                guard.success(total);
                Ok(results)
            }
            Err(error) => {
                if let Err(rollback_error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(%rollback_error, "Rollback after failed transaction also failed");
                }
                let broker_error = BrokerError::from(error);
                guard.failure(&broker_error.to_string());
                Err(broker_error)
            }
        }
    }

    #[instrument(skip(self), fields(adapter_id = %self.state.adapter_id()))]
    async fn health_check(&self) -> Result<HealthStatus> {
        self.state.ensure_ready()?;
        let pool = self.pool.get()?;
        let started = Instant::now();

        let probe = async {
            let mut conn = pool.acquire().await?;
            sqlx::Connection::ping(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        match probe {
            Ok(()) => {
                let response_time_ms = started.elapsed().as_millis() as u64;
                self.state.events.emit(AdapterEvent::HealthCheckPassed {
                    adapter_id: self.adapter_id(),
                    response_time_ms,
                });
                Ok(HealthStatus::healthy(response_time_ms))
            }
            Err(error) => {
                self.state.events.emit(AdapterEvent::HealthCheckFailed {
                    adapter_id: self.adapter_id(),
                    error: error.to_string(),
                });
                Err(BrokerError::Connection(error.to_string()))
            }
        }
    }

    fn connection_status(&self) -> ConnectionStatus {
        let (connections, idle) = self.pool.gauges();
        self.state.status(connections, idle)
    }

    fn metrics(&self) -> AdapterMetrics {
        self.state.metrics.snapshot()
    }

    fn reset_metrics(&self) {
        self.state.metrics.reset();
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            adapter_id: self.adapter_id(),
            database_type: DatabaseType::PostgreSql,
            host: self.config.host.clone(),
            port: self.port(),
            database: self.config.database.clone(),
            user: self.config.user.clone(),
            ssl: self.config.ssl.is_some(),
            connection_limit: self.pool_settings.max_connections,
        }
    }

    fn schema_analyzer(&self) -> Arc<dyn SchemaAnalyzer> {
        Arc::clone(&self.analyzer) as Arc<dyn SchemaAnalyzer>
    }

    fn data_profiler(&self) -> Arc<dyn DataProfiler> {
        Arc::clone(&self.profiler) as Arc<dyn DataProfiler>
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.state.events.subscribe()
    }
}

impl std::fmt::Debug for PgAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgAdapter")
            .field("adapter_id", &self.state.adapter_id())
            .field("connected", &self.state.is_connected())
            .finish()
    }
}
