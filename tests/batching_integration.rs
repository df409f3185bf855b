//! 批量 sink 端到端测试
//!
//! 使用内存存储，覆盖阈值刷新、启动建表幂等、瞬时错误重试和停机行为。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quantum_log_db::{
    AfterShutdownPolicy, DbSinkBuilder, DbSinkConfig, DbSinkError, DiagnosticEvent, Diagnostics,
    LogEvent, LogLevel, MemoryStore, StoreError, TableName,
};

fn table() -> TableName {
    TableName::new(Some("dbo"), "Logs")
}

fn config() -> DbSinkConfig {
    let mut config = DbSinkConfig::new("LogDb", "Logs");
    config.auto_create_table = true;
    config.batch_posting_limit = 5;
    config.period_ms = 30_000;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

async fn wait_for_rows(store: &MemoryStore, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.row_count(&table()) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("rows were not written in time");
}

#[tokio::test]
async fn test_threshold_writes_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .build_batching()
        .await
        .unwrap();

    for i in 0..5 {
        sink.emit(&LogEvent::new(LogLevel::Info, format!("event {}", i))).unwrap();
    }
    wait_for_rows(&store, 5).await;

    assert_eq!(store.insert_calls(), 1);
    assert_eq!(sink.buffered(), 0);
    let messages: HashSet<String> = store
        .rows(&table())
        .iter()
        .filter_map(|row| row.get("Message")?.as_text().map(str::to_string))
        .collect();
    assert_eq!(messages.len(), 5);

    sink.shutdown().await.unwrap();
    assert_eq!(store.row_count(&table()), 5);
}

#[tokio::test]
async fn test_second_startup_skips_ddl() {
    let store = Arc::new(MemoryStore::new());

    for _ in 0..2 {
        let sink = DbSinkBuilder::new(config())
            .store(store.clone())
            .build_batching()
            .await
            .unwrap();
        sink.shutdown().await.unwrap();
    }

    assert_eq!(store.ddl_count(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried_without_duplicates() {
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let diagnostics = Arc::new(Diagnostics::with_listener(Arc::new(move |event: &DiagnosticEvent| {
        recorded.lock().unwrap().push(event.clone());
    })));

    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .diagnostics(diagnostics.clone())
        .build_batching()
        .await
        .unwrap();
    store.fail_next(1, StoreError::transient("deadlock detected"));

    for i in 0..3 {
        sink.emit(&LogEvent::new(LogLevel::Warn, format!("retry {}", i))).unwrap();
    }
    sink.flush().await.unwrap();

    assert_eq!(store.row_count(&table()), 3);
    assert_eq!(store.insert_calls(), 2);
    let snapshot = diagnostics.snapshot();
    assert_eq!(snapshot.retries, 1);
    assert_eq!(snapshot.batches_failed, 0);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, DiagnosticEvent::RetryScheduled { attempt: 1, .. })));

    sink.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_structural_failure_drops_batch_and_continues() {
    let store = Arc::new(MemoryStore::new());
    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .build_batching()
        .await
        .unwrap();
    store.fail_next(1, StoreError::structural("value too long"));

    sink.emit(&LogEvent::new(LogLevel::Info, "dropped")).unwrap();
    sink.flush().await.unwrap();
    sink.emit(&LogEvent::new(LogLevel::Info, "kept")).unwrap();
    sink.shutdown().await.unwrap();

    let rows = store.rows(&table());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("Message").and_then(|v| v.as_text()), Some("kept"));
    assert_eq!(sink.diagnostics().snapshot().batches_failed, 1);
}

#[tokio::test]
async fn test_shutdown_flushes_and_rejects_late_events() {
    let store = Arc::new(MemoryStore::new());
    let sink = DbSinkBuilder::new(config())
        .store(store.clone())
        .build_batching()
        .await
        .unwrap();

    sink.emit(&LogEvent::new(LogLevel::Error, "last words")).unwrap();
    sink.shutdown().await.unwrap();
    assert_eq!(store.row_count(&table()), 1);

    let late = sink.emit(&LogEvent::new(LogLevel::Error, "too late"));
    assert!(matches!(late, Err(DbSinkError::SinkClosed)));
}

#[tokio::test]
async fn test_best_effort_after_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let mut config = config();
    config.after_shutdown = AfterShutdownPolicy::BestEffort;
    let sink = DbSinkBuilder::new(config)
        .store(store.clone())
        .build_batching()
        .await
        .unwrap();

    sink.shutdown().await.unwrap();
    sink.emit(&LogEvent::new(LogLevel::Info, "ignored")).unwrap();

    assert_eq!(store.row_count(&table()), 0);
    assert_eq!(sink.diagnostics().snapshot().events_dropped, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut config = config();
    config.batch_posting_limit = 16;
    config.period_ms = 20;
    let sink = Arc::new(
        DbSinkBuilder::new(config)
            .store(store.clone())
            .build_batching()
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for producer in 0..4 {
        let sink = sink.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..250 {
                sink.emit(
                    &LogEvent::new(LogLevel::Info, format!("p{}-{}", producer, i))
                        .with_property("Producer", producer),
                )
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    sink.shutdown().await.unwrap();

    let rows = store.rows(&table());
    assert_eq!(rows.len(), 1000);
    let unique: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.get("Message")?.as_text().map(str::to_string))
        .collect();
    assert_eq!(unique.len(), 1000);
    assert_eq!(store.max_concurrent_inserts(), 1);
}
