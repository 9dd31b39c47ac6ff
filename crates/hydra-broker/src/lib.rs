//! Fleet assembly for the hydra multi-database broker.
//!
//! This crate ties the engine-specific adapters to the core machinery:
//!
//! - The **factory** resolves an engine per pool entry (explicit type, port,
//!   host substring, default) and constructs the adapter.
//! - The **manager** owns the named registry: concurrent connect/disconnect
//!   sweeps, default-pool selection, fan-out health, tag/type filters.
//! - The **dispatcher** fans independent queries out across pools and merges
//!   labeled, order-preserving results.
//! - The **tool surface** ([`Broker`]) is the mountable boundary a JSON-RPC
//!   transport wraps; resources resolve `database://` URIs over the same
//!   engine.
//!
//! The transport itself, process lifecycle, and signal handling live outside
//! this workspace; [`Broker::startup`] and [`Broker::shutdown`] are the
//! hooks they call.

/// Cross-database fan-out with per-item outcomes.
pub mod dispatch;

/// Adapter construction and database-type detection.
pub mod factory;

/// The named adapter registry.
pub mod manager;

/// Restricted natural-language query surface.
pub mod nlq;

/// `database://` resource resolution.
pub mod resources;

/// The broker facade and its tool surface.
pub mod tools;

pub use dispatch::{cross_query, CrossQueryItem, CrossQueryResult};
pub use factory::{resolve_database_type, AdapterFactory};
pub use manager::{ConnectionManager, FleetHealth, ManagerStatistics};
pub use nlq::{GeneratedSql, HeuristicSqlGenerator, SchemaContext, SqlGenerator, TableSummary};
pub use resources::{parse_resource_uri, read_resource, ResourcePath};
pub use tools::Broker;

pub use hydra_common::{BrokerError, Result};
