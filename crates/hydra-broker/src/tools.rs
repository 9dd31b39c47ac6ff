//! The broker facade and its tool surface.
//!
//! [`Broker`] ties the fleet together: manager, per-pool executors, the
//! schema cache, and the NL generator. Each public method here is one tool
//! the JSON-RPC transport mounts verbatim; payloads are `serde_json::Value`
//! so the transport stays a thin shell.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};

use hydra_common::{BrokerError, Result};
use hydra_core::adapter::HealthStatus;
use hydra_core::cache::{SchemaCache, SchemaCacheConfig};
use hydra_core::config::{BrokerConfig, SecurityConfig};
use hydra_core::executor::{AuditEntry, QueryExecutor, QueryInspection, QueryOptions};
use hydra_core::profile::ProfileOptions;
use hydra_core::validator::QueryValidator;
use hydra_core::value::SqlValue;

use crate::dispatch::{cross_query, CrossQueryItem, CrossQueryResult};
use crate::factory::AdapterFactory;
use crate::manager::ConnectionManager;
use crate::nlq::{HeuristicSqlGenerator, SchemaContext, SqlGenerator};

/// The assembled broker.
pub struct Broker {
    manager: ConnectionManager,
    security: SecurityConfig,
    validator: QueryValidator,
    executors: DashMap<String, Arc<QueryExecutor>>,
    cache: Arc<SchemaCache>,
    generator: Box<dyn SqlGenerator>,
}

impl Broker {
    /// Builds the full fleet from configuration with the default factory,
    /// cache sizing, and heuristic NL generator.
    pub fn from_config(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        if config.connections.is_empty() {
            return Err(BrokerError::Configuration(
                "No database connections configured".to_string(),
            ));
        }
        let factory = AdapterFactory::new();
        let manager = ConnectionManager::from_config(&config, &factory)?;
        Ok(Self::assemble(manager, config.security))
    }

    /// Assembles a broker around an existing manager; used by tests that
    /// inject stub adapters.
    pub fn assemble(manager: ConnectionManager, security: SecurityConfig) -> Self {
        Self {
            validator: QueryValidator::new(&security),
            manager,
            security,
            executors: DashMap::new(),
            cache: SchemaCache::new(SchemaCacheConfig::default()),
            generator: Box::new(HeuristicSqlGenerator::new()),
        }
    }

    /// Swaps the NL generator implementation.
    pub fn with_generator(mut self, generator: Box<dyn SqlGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Connects every pool and starts the cache sweeper. A failed pool
    /// fails startup; the process owner decides whether to exit.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<()> {
        self.manager.connect_all().await?;
        self.cache.start_sweeper();
        info!("Broker started");
        Ok(())
    }

    /// Disconnects every pool, then flushes and stops the cache.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.manager.disconnect_all().await;
        self.executors.clear();
        self.cache.destroy();
        info!("Broker stopped");
    }

    /// Per-pool executor; each pool keeps its own result cache and audit
    /// ring so identical SQL on different pools never collides.
    fn executor_for(&self, pool: &str) -> Arc<QueryExecutor> {
        self.executors
            .entry(pool.to_string())
            .or_insert_with(|| Arc::new(QueryExecutor::new(self.security.clone())))
            .value()
            .clone()
    }

    // ------------------------------------------------------------------
    // Tool surface
    // ------------------------------------------------------------------

    /// `list_databases`: summary, per-pool info, and fleet statistics.
    pub fn list_databases(&self) -> JsonValue {
        let names = self.manager.connection_names();
        let databases: Vec<JsonValue> = names
            .iter()
            .filter_map(|name| {
                let adapter = self.manager.get_connection(Some(name)).ok()?;
                let config = self.manager.connection_config(name);
                Some(json!({
                    "name": name,
                    "info": adapter.connection_info(),
                    "status": adapter.connection_status(),
                    "metrics": adapter.metrics(),
                    "description": config.as_ref().and_then(|c| c.description.clone()),
                    "tags": config.map(|c| c.tags).unwrap_or_default(),
                }))
            })
            .collect();

        json!({
            "summary": {
                "total_databases": names.len(),
                "names": names,
                "default_connection": self.manager.default_connection(),
            },
            "databases": databases,
            "statistics": {
                "manager": self.manager.statistics(),
                "schema_cache": self.cache.stats(),
            },
        })
    }

    /// `database_health_check`: one pool, or the whole fleet with the
    /// aggregate summary.
    pub async fn database_health_check(&self, pool: Option<&str>) -> Result<JsonValue> {
        match pool {
            Some(name) => {
                let adapter = self.manager.get_connection(Some(name))?;
                let status = match adapter.health_check().await {
                    Ok(status) => status,
                    Err(error) => HealthStatus::unhealthy(error.to_string()),
                };
                Ok(json!({ "database": name, "health": status }))
            }
            None => {
                let fleet = self.manager.health_check_all().await;
                Ok(serde_json::to_value(fleet)?)
            }
        }
    }

    /// `execute_query`: validated, cached, bounded execution on one pool.
    pub async fn execute_query(
        &self,
        sql: &str,
        database: Option<&str>,
        parameters: &[JsonValue],
        options: QueryOptions,
    ) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let adapter = self.manager.get_connection(Some(&name))?;
        let params = SqlValue::params_from_json(parameters)?;
        let executor = self.executor_for(&name);
        let result = executor
            .execute(adapter.as_ref(), sql, &params, &options)
            .await?;
        Ok(serde_json::to_value(result)?)
    }

    /// `analyze_query`: validator + heuristic analysis, no database
    /// round-trip.
    pub fn analyze_query(&self, sql: &str) -> QueryInspection {
        QueryInspection {
            validation: self.validator.validate(sql),
            analysis: self.validator.analyze(sql),
        }
    }

    /// `explain_query`: EXPLAIN-prefixed execution, unaudited.
    pub async fn explain_query(
        &self,
        sql: &str,
        database: Option<&str>,
        parameters: &[JsonValue],
    ) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let adapter = self.manager.get_connection(Some(&name))?;
        let params = SqlValue::params_from_json(parameters)?;
        let executor = self.executor_for(&name);
        let result = executor.explain(adapter.as_ref(), sql, &params).await?;
        Ok(serde_json::to_value(result)?)
    }

    /// `natural_language_query`: schema-grounded template generation, then
    /// normal validated execution.
    pub async fn natural_language_query(
        &self,
        question: &str,
        database: Option<&str>,
        context: Option<SchemaContext>,
    ) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let context = match context {
            Some(context) => context,
            None => self.schema_context(&name).await?,
        };
        let generated = self.generator.generate(question, Some(&context))?;

        let adapter = self.manager.get_connection(Some(&name))?;
        let executor = self.executor_for(&name);
        let result = executor
            .execute(
                adapter.as_ref(),
                &generated.sql,
                &[],
                &QueryOptions::default(),
            )
            .await?;

        Ok(json!({
            "generated_sql": generated.sql,
            "confidence": generated.confidence,
            "explanation": generated.explanation,
            "suggested_improvements": generated.suggested_improvements,
            "execution_time_ms": result.execution_time_ms,
            "row_count": result.row_count,
            "rows": result.rows,
            "fields": result.fields,
        }))
    }

    /// `cross_database_query`: concurrent fan-out, per-item outcomes,
    /// no result caching.
    pub async fn cross_database_query(&self, items: &[CrossQueryItem]) -> CrossQueryResult {
        cross_query(&self.manager, &self.validator, items).await
    }

    /// `analyze_schema`: full SchemaInfo for one pool, cache-backed.
    pub async fn analyze_schema(&self, database: Option<&str>) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let key = SchemaCache::schema_key(&name);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let adapter = self.manager.get_connection(Some(&name))?;
        let schema = adapter.schema_analyzer().full_schema().await?;
        let value = serde_json::to_value(&schema)?;
        self.cache.set(key, value.clone(), None);
        Ok(value)
    }

    /// `get_table_info`: one table of one pool, cache-backed.
    pub async fn get_table_info(&self, table: &str, database: Option<&str>) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let key = SchemaCache::table_key(&name, table);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let adapter = self.manager.get_connection(Some(&name))?;
        let info = adapter.schema_analyzer().table_info(table).await?;
        let value = serde_json::to_value(&info)?;
        self.cache.set(key, value.clone(), None);
        Ok(value)
    }

    /// `profile_table`: statistical profile of one table, cache-backed.
    pub async fn profile_table(&self, table: &str, database: Option<&str>) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let key = SchemaCache::profile_key(&name, table);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let adapter = self.manager.get_connection(Some(&name))?;
        let profile = adapter
            .data_profiler()
            .profile_table(table, &ProfileOptions::default())
            .await?;
        let value = serde_json::to_value(&profile)?;
        self.cache.set(key, value.clone(), None);
        Ok(value)
    }

    /// `get_table_relationships`: FK graph of one pool, cache-backed.
    pub async fn get_table_relationships(&self, database: Option<&str>) -> Result<JsonValue> {
        let name = self.manager.resolve_name(database)?;
        let key = SchemaCache::relationships_key(&name);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let adapter = self.manager.get_connection(Some(&name))?;
        let map = adapter.schema_analyzer().relationships().await?;
        let value = serde_json::to_value(&map)?;
        self.cache.set(key, value.clone(), None);
        Ok(value)
    }

    /// `clear_schema_cache`: full flush or regex-scoped invalidation.
    pub fn clear_schema_cache(&self, pattern: Option<&str>) -> Result<usize> {
        self.cache.invalidate(pattern)
    }

    /// Recent audit entries for one pool's executor.
    pub fn recent_audit(&self, database: Option<&str>, limit: usize) -> Result<Vec<AuditEntry>> {
        let name = self.manager.resolve_name(database)?;
        Ok(self.executor_for(&name).recent_audit(limit))
    }

    /// Prefetches schema and small-table profiles for one pool.
    pub async fn warm_up(&self, database: Option<&str>) -> Result<()> {
        let name = self.manager.resolve_name(database)?;
        let adapter = self.manager.get_connection(Some(&name))?;
        self.cache
            .warm_up(
                &name,
                adapter.schema_analyzer().as_ref(),
                adapter.data_profiler().as_ref(),
            )
            .await;
        Ok(())
    }

    /// Builds the NL generator's schema context from the cached schema.
    async fn schema_context(&self, name: &str) -> Result<SchemaContext> {
        let schema_value = self.analyze_schema(Some(name)).await?;
        let schema: hydra_core::schema::SchemaInfo = serde_json::from_value(schema_value)
            .map_err(|e| BrokerError::Internal(format!("Cached schema is malformed: {}", e)))?;
        Ok(SchemaContext::from_schema(&schema))
    }
}
