//! PostgreSQL backend for the hydra broker.
//!
//! Implements the adapter contract from `hydra-core` on top of a sqlx
//! PostgreSQL pool. Schema introspection reads `information_schema` together
//! with `pg_catalog` (`pg_class`, `pg_index`, `pg_am`, `pg_constraint`,
//! `pg_proc`), preserving index and foreign-key column order via ordinal
//! unnest. Profiling uses `PERCENTILE_CONT` for medians and `RANDOM()`
//! sampling.

/// Pool lifecycle, execution, transactions, and health for PostgreSQL.
pub mod adapter;

/// Data profiling with SQL-side aggregation.
pub mod profiler;

/// Schema introspection over `information_schema` + `pg_catalog`.
pub mod schema;

/// Row decoding, parameter binding, and type normalization.
pub mod values;

pub use adapter::PgAdapter;
pub use profiler::PgDataProfiler;
pub use schema::PgSchemaAnalyzer;

pub use hydra_common::{BrokerError, Result};
