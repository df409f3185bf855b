//! 审计 sink 与 tracing 层的集成测试

use std::sync::Arc;

use quantum_log_db::{
    DbSink, DbSinkBuilder, DbSinkConfig, DbSinkError, DbSinkLayer, LogEvent, LogLevel,
    MemoryStore, StoreError, TableName,
};
use tracing_subscriber::layer::SubscriberExt;

fn table() -> TableName {
    TableName::new(Some("audit"), "Events")
}

fn config() -> DbSinkConfig {
    let mut config = DbSinkConfig::new("AuditDb", "Events");
    config.schema_name = "audit".to_string();
    config.auto_create_table = true;
    config.level = "INFO".to_string();
    config
}

#[tokio::test]
async fn test_audit_write_is_synchronous() {
    let store = Arc::new(MemoryStore::new());
    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .build_audit()
        .await
        .unwrap();

    sink.emit(&LogEvent::new(LogLevel::Warn, "role granted").with_property("Actor", "alice"))
        .unwrap();

    // 返回 Ok 时行已在存储中
    assert_eq!(store.row_count(&table()), 1);
    assert_eq!(store.insert_calls(), 1);
}

#[tokio::test]
async fn test_audit_failure_reaches_caller() {
    let store = Arc::new(MemoryStore::new());
    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .build_audit()
        .await
        .unwrap();
    store.fail_next(1, StoreError::transient("connection reset by peer"));

    let err = sink
        .send_event(LogEvent::new(LogLevel::Error, "funds moved"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbSinkError::TransientStore(_)));
    assert!(err.is_recoverable());
    assert_eq!(store.row_count(&table()), 0);
}

#[tokio::test]
async fn test_audit_respects_min_level() {
    let store = Arc::new(MemoryStore::new());
    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .build_audit()
        .await
        .unwrap();

    sink.emit(&LogEvent::new(LogLevel::Debug, "noise")).unwrap();
    assert_eq!(store.insert_calls(), 0);
}

#[tokio::test]
async fn test_layer_forwards_tracing_events() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(
        DbSinkBuilder::new(config())
            .store(store.clone())
            .build_audit()
            .await
            .unwrap(),
    );

    let subscriber = tracing_subscriber::registry().with(DbSinkLayer::new(sink.clone()));
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(target: "billing", invoice = "INV-7", amount = 12.5, "invoice paid");
        tracing::debug!(target: "billing", "filtered out");
    });

    let rows = store.rows(&table());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("Message").and_then(|v| v.as_text()), Some("invoice paid"));
    assert_eq!(rows[0].get("Level").and_then(|v| v.as_text()), Some("INFO"));
    let properties = rows[0].get("Properties").and_then(|v| v.as_text()).unwrap();
    assert!(properties.contains("INV-7"));

    sink.shutdown().await.unwrap();
    assert!(!sink.is_healthy().await);
}
