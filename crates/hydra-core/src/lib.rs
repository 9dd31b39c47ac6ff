//! Core engine of the hydra multi-database broker.
//!
//! hydra sits between a JSON-RPC tool transport and a named fleet of
//! read-only MySQL/PostgreSQL pools. This crate carries everything that is
//! engine-independent:
//!
//! - The uniform adapter contract and its lifecycle machinery
//! - The cross-engine value and result model
//! - The read-only SQL admission filter
//! - The timeout- and row-bounded query executor with result caching and
//!   auditing
//! - The TTL+LRU schema cache
//! - Configuration loading (document and environment forms)
//!
//! The engine-specific halves live in `hydra-mysql` and `hydra-postgres`;
//! pool registry, factory, and fan-out live in `hydra-broker`.
//!
//! # Architecture
//!
//! ```text
//! Tool transport (JSON-RPC, out of scope)
//!           |
//!     hydra-broker (factory, manager, dispatcher, tools)
//!           |
//!      hydra-core (contract, validator, executor, cache)
//!        /     \
//! hydra-mysql  hydra-postgres (sqlx-backed adapters)
//! ```
//!
//! # Safety
//!
//! Caller-supplied SQL only reaches an adapter through the validator and
//! executor; the adapters themselves never interpret statements. All
//! parameter binding is driver-side.

/// The uniform adapter contract plus shared lifecycle state, metrics
/// recording, and the adapter event bus.
pub mod adapter;

/// TTL- and size-bounded schema cache with pattern invalidation and warm-up.
pub mod cache;

/// Configuration model: per-pool entries, the multi-pool document, and the
/// `DB_<NAME>_<PROPERTY>` environment mapping.
pub mod config;

/// Validating, caching, auditing query execution with timeout and row caps.
pub mod executor;

/// Data profiling model and the shared quality-scoring heuristics.
pub mod profile;

/// Query result and statement types shared by every backend.
pub mod result;

/// Schema introspection model and the analyzer contract.
pub mod schema;

/// In-memory stub adapter for driving tests without a database.
pub mod testing;

/// Read-only SQL admission filtering and heuristic query analysis.
pub mod validator;

/// Cross-engine SQL value representation.
pub mod value;

pub use adapter::{
    AdapterEvent, AdapterMetrics, AdapterState, ConnectionInfo, ConnectionStatus, DatabaseAdapter,
    DatabaseType, EventBus, HealthStatus, MetricsRecorder, METRICS_EMIT_INTERVAL,
};
pub use cache::{CacheStats, SchemaCache, SchemaCacheConfig};
pub use config::{
    BrokerConfig, ConnectionConfig, PoolSettings, RetryConfig, SecurityConfig, SslConfig, SslMode,
};
pub use executor::{AuditEntry, ExecutorStats, QueryExecutor, QueryInspection, QueryOptions};
pub use profile::{
    ColumnProfile, DataProfiler, DataQuality, PatternCounts, ProfileOptions, SamplingInfo,
    TableProfile, TableRelationships, TopValue,
};
pub use result::{ExecutionMetadata, FieldInfo, QueryResult, Row, SqlStatement};
pub use schema::{
    ColumnInfo, DatabaseInfo, ForeignKeyInfo, IndexInfo, ProcedureInfo, RelationshipMap,
    SchemaAnalyzer, SchemaInfo, TableInfo, TableStatistics, ViewInfo,
};
pub use validator::{ComplexityLevel, QueryAnalysis, QueryValidator, ValidationReport};
pub use value::SqlValue;

pub use hydra_common::{BrokerError, Result};
