//! `database://` resource resolution.
//!
//! The transport exposes read-only resources over the same engine the tools
//! use; this module maps URIs onto broker calls:
//!
//! - `database://connections`
//! - `database://<pool>/schema`
//! - `database://<pool>/tables`
//! - `database://<pool>/table/<name>`
//! - `database://<pool>/table/<name>/profile`

use serde_json::{json, Value as JsonValue};

use hydra_common::{BrokerError, Result};

use crate::tools::Broker;

const SCHEME: &str = "database://";

/// Parsed form of one resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePath {
    Connections,
    Schema { pool: String },
    Tables { pool: String },
    Table { pool: String, table: String },
    TableProfile { pool: String, table: String },
}

/// Parses a `database://` URI into its resource path.
pub fn parse_resource_uri(uri: &str) -> Result<ResourcePath> {
    let rest = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| BrokerError::NotFound(format!("Unknown resource URI: {}", uri)))?;

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["connections"] => Ok(ResourcePath::Connections),
        [pool, "schema"] => Ok(ResourcePath::Schema {
            pool: (*pool).to_string(),
        }),
        [pool, "tables"] => Ok(ResourcePath::Tables {
            pool: (*pool).to_string(),
        }),
        [pool, "table", table] => Ok(ResourcePath::Table {
            pool: (*pool).to_string(),
            table: (*table).to_string(),
        }),
        [pool, "table", table, "profile"] => Ok(ResourcePath::TableProfile {
            pool: (*pool).to_string(),
            table: (*table).to_string(),
        }),
        _ => Err(BrokerError::NotFound(format!(
            "Unknown resource URI: {}",
            uri
        ))),
    }
}

/// Resolves a resource URI against the broker.
pub async fn read_resource(broker: &Broker, uri: &str) -> Result<JsonValue> {
    match parse_resource_uri(uri)? {
        ResourcePath::Connections => {
            let names = broker.manager().connection_names();
            let connections: Vec<JsonValue> = names
                .iter()
                .filter_map(|name| {
                    let adapter = broker.manager().get_connection(Some(name)).ok()?;
                    Some(json!({
                        "name": name,
                        "info": adapter.connection_info(),
                        "status": adapter.connection_status(),
                    }))
                })
                .collect();
            Ok(json!({ "connections": connections }))
        }
        ResourcePath::Schema { pool } => broker.analyze_schema(Some(&pool)).await,
        ResourcePath::Tables { pool } => {
            let schema = broker.analyze_schema(Some(&pool)).await?;
            Ok(json!({ "tables": schema.get("tables").cloned().unwrap_or(JsonValue::Null) }))
        }
        ResourcePath::Table { pool, table } => broker.get_table_info(&table, Some(&pool)).await,
        ResourcePath::TableProfile { pool, table } => {
            broker.profile_table(&table, Some(&pool)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ConnectionManager;
    use hydra_core::config::SecurityConfig;
    use hydra_core::schema::{SchemaInfo, TableInfo};
    use hydra_core::testing::StubAdapter;
    use std::sync::Arc;

    fn broker() -> Broker {
        let schema = SchemaInfo {
            tables: vec![TableInfo {
                name: "users".to_string(),
                schema: "d".to_string(),
                columns: Vec::new(),
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
                row_count: Some(5),
                size_in_bytes: Some(512),
            }],
            views: Vec::new(),
            procedures: Vec::new(),
        };
        let manager = ConnectionManager::new();
        manager.register(
            "main",
            serde_json::from_value(json!({"host": "s", "user": "u", "database": "d"})).unwrap(),
            Arc::new(StubAdapter::connected().with_schema(schema)),
        );
        Broker::assemble(manager, SecurityConfig::default())
    }

    #[test]
    fn test_parse_known_uris() {
        assert_eq!(
            parse_resource_uri("database://connections").unwrap(),
            ResourcePath::Connections
        );
        assert_eq!(
            parse_resource_uri("database://main/schema").unwrap(),
            ResourcePath::Schema {
                pool: "main".into()
            }
        );
        assert_eq!(
            parse_resource_uri("database://main/table/users/profile").unwrap(),
            ResourcePath::TableProfile {
                pool: "main".into(),
                table: "users".into()
            }
        );
    }

    #[test]
    fn test_parse_unknown_uris() {
        assert!(parse_resource_uri("database://").is_err());
        assert!(parse_resource_uri("database://main/unknown").is_err());
        assert!(parse_resource_uri("files://main/schema").is_err());
        assert!(parse_resource_uri("database://main/table").is_err());
    }

    #[tokio::test]
    async fn test_connections_resource() {
        let broker = broker();
        let value = read_resource(&broker, "database://connections").await.unwrap();
        assert_eq!(value["connections"][0]["name"], json!("main"));
    }

    #[tokio::test]
    async fn test_schema_and_tables_resources() {
        let broker = broker();
        let schema = read_resource(&broker, "database://main/schema").await.unwrap();
        assert_eq!(schema["tables"][0]["name"], json!("users"));

        let tables = read_resource(&broker, "database://main/tables").await.unwrap();
        assert_eq!(tables["tables"][0]["name"], json!("users"));
        assert!(tables.get("views").is_none());
    }

    #[tokio::test]
    async fn test_table_resource() {
        let broker = broker();
        let table = read_resource(&broker, "database://main/table/users")
            .await
            .unwrap();
        assert_eq!(table["name"], json!("users"));

        let missing = read_resource(&broker, "database://main/table/ghosts").await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_profile_resource() {
        let broker = broker();
        let profile = read_resource(&broker, "database://main/table/users/profile")
            .await
            .unwrap();
        assert_eq!(profile["table_name"], json!("users"));
    }

    #[tokio::test]
    async fn test_unknown_pool_propagates_not_found() {
        let broker = broker();
        let error = read_resource(&broker, "database://ghost/schema")
            .await
            .unwrap_err();
        assert!(error.to_string().contains("'ghost' not found"));
    }
}
