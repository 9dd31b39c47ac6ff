//! MySQL backend for the hydra broker.
//!
//! Implements the adapter contract from `hydra-core` on top of a sqlx MySQL
//! pool: parameterized execution, explicit BEGIN/COMMIT/ROLLBACK
//! transactions on a dedicated connection, ping-based health probes, and the
//! `INFORMATION_SCHEMA`-backed schema analyzer and data profiler.

/// Pool lifecycle, execution, transactions, and health for MySQL.
pub mod adapter;

/// Data profiling with SQL-side aggregation (sampled or full scan).
pub mod profiler;

/// Schema introspection over `INFORMATION_SCHEMA`.
pub mod schema;

/// Row decoding, parameter binding, and type normalization.
pub mod values;

pub use adapter::MySqlAdapter;
pub use profiler::MySqlDataProfiler;
pub use schema::MySqlSchemaAnalyzer;

pub use hydra_common::{BrokerError, Result};
