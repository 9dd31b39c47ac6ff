//! End-to-end broker flows against stub adapters.

use std::sync::Arc;

use serde_json::json;

use hydra_broker::{Broker, ConnectionManager, CrossQueryItem};
use hydra_core::adapter::DatabaseAdapter;
use hydra_core::config::{ConnectionConfig, SecurityConfig};
use hydra_core::executor::QueryOptions;
use hydra_core::result::Row;
use hydra_core::testing::StubAdapter;
use hydra_core::value::SqlValue;

fn entry() -> ConnectionConfig {
    serde_json::from_value(json!({"host": "stub", "user": "u", "database": "d"})).unwrap()
}

fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row::from_iter([("id".to_string(), SqlValue::Int(i as i64))]))
        .collect()
}

#[tokio::test]
async fn read_only_admission_leaves_no_trace() {
    let stub = Arc::new(StubAdapter::connected());
    let manager = ConnectionManager::new();
    manager.register("u", entry(), Arc::clone(&stub) as Arc<dyn DatabaseAdapter>);
    let broker = Broker::assemble(manager, SecurityConfig::default());

    let error = broker
        .execute_query("DELETE FROM users", Some("u"), &[], QueryOptions::default())
        .await
        .unwrap_err();

    assert!(error.to_string().contains("DELETE"));
    assert_eq!(stub.query_calls(), 0);
    assert_eq!(stub.metrics().queries_executed, 0);
    assert!(broker.recent_audit(Some("u"), 10).unwrap().is_empty());
}

#[tokio::test]
async fn timeout_restores_active_queries_and_counts_the_error() {
    let stub = Arc::new(StubAdapter::connected().with_delay_ms(5_000));
    let manager = ConnectionManager::new();
    manager.register("slow", entry(), Arc::clone(&stub) as Arc<dyn DatabaseAdapter>);
    let broker = Broker::assemble(manager, SecurityConfig::default());

    let before = stub.connection_status().active_queries;
    let error = broker
        .execute_query(
            "SELECT 1",
            Some("slow"),
            &[],
            QueryOptions {
                timeout_ms: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "Query timeout after 100ms");
    assert_eq!(stub.connection_status().active_queries, before);
    assert_eq!(stub.metrics().error_count, 1);
}

#[tokio::test]
async fn repeated_select_is_served_from_cache() {
    let stub = Arc::new(StubAdapter::connected().with_rows(rows(10)));
    let manager = ConnectionManager::new();
    manager.register("m", entry(), Arc::clone(&stub) as Arc<dyn DatabaseAdapter>);
    manager.set_default_connection("m").unwrap();
    let broker = Broker::assemble(manager, SecurityConfig::default());

    let first = broker
        .execute_query("SELECT id FROM t LIMIT 10", None, &[], QueryOptions::default())
        .await
        .unwrap();
    let second = broker
        .execute_query("SELECT id FROM t LIMIT 10", None, &[], QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(second["cached"], json!(true));
    assert!(second["cache_age_ms"].as_u64().is_some());
    assert_eq!(first["rows"], second["rows"]);
    assert_eq!(stub.query_calls(), 1);
}

#[tokio::test]
async fn cross_database_fan_out_merges_labeled_results() {
    let manager = ConnectionManager::new();
    manager.register(
        "a",
        entry(),
        Arc::new(StubAdapter::connected().with_rows(rows(3))),
    );
    manager.register(
        "b",
        entry(),
        Arc::new(StubAdapter::connected_postgres().with_rows(rows(5))),
    );
    let broker = Broker::assemble(manager, SecurityConfig::default());

    let items = vec![
        CrossQueryItem {
            pool: "a".into(),
            sql: "SELECT id FROM t LIMIT 10".into(),
            alias: Some("A".into()),
            parameters: Vec::new(),
        },
        CrossQueryItem {
            pool: "b".into(),
            sql: "SELECT id FROM t LIMIT 10".into(),
            alias: Some("B".into()),
            parameters: Vec::new(),
        },
    ];
    let outcome = broker.cross_database_query(&items).await;

    assert_eq!(outcome.summary.total_queries, 2);
    assert_eq!(outcome.summary.total_rows, 8);
    assert_eq!(outcome.results[0].alias.as_deref(), Some("A"));
    assert_eq!(outcome.results[1].alias.as_deref(), Some("B"));
    assert_eq!(outcome.results[0].pool, "a");
    assert_eq!(outcome.results[1].pool, "b");
}

#[tokio::test]
async fn fleet_health_reports_every_pool() {
    let manager = ConnectionManager::new();
    manager.register(
        "fast",
        entry(),
        Arc::new(StubAdapter::connected().with_health_latency_ms(50)),
    );
    manager.register(
        "slow",
        entry(),
        Arc::new(StubAdapter::connected().with_health_latency_ms(80)),
    );
    manager.register(
        "down",
        entry(),
        Arc::new(StubAdapter::connected().with_health_failure("no route to host")),
    );
    let broker = Broker::assemble(manager, SecurityConfig::default());

    let fleet = broker.database_health_check(None).await.unwrap();
    assert_eq!(fleet["healthy_databases"], json!(2));
    assert_eq!(fleet["databases"]["down"]["is_healthy"], json!(false));
    let average = fleet["average_response_time_ms"].as_f64().unwrap();
    assert!((average - 130.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn connect_all_registers_every_configured_pool() {
    let manager = ConnectionManager::new();
    for name in ["one", "two", "three"] {
        manager.register(
            name,
            entry(),
            Arc::new(StubAdapter::new(hydra_core::adapter::DatabaseType::MySql)),
        );
    }
    let broker = Broker::assemble(manager, SecurityConfig::default());

    broker.startup().await.unwrap();
    assert_eq!(broker.manager().connection_names().len(), 3);
    broker.shutdown().await;
    assert!(broker.manager().connection_names().is_empty());
}
