//! 审计数据库 Sink
//!
//! 每个事件单独写入，只有在存储确认写入后才返回成功；任何失败都返回给调用方。
//! 没有后台任务，也没有缓冲。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::core::event::{LogEvent, LogLevel};
use crate::diagnostics::Diagnostics;
use crate::error::{DbSinkError, Result};
use crate::sinks::database::projector::RowProjector;
use crate::sinks::database::schema::SchemaDescriptor;
use crate::sinks::database::store::LogStore;
use crate::sinks::traits::DbSink;

/// 审计数据库 Sink
#[derive(Debug, Clone)]
pub struct AuditSink {
    projector: RowProjector,
    store: Arc<dyn LogStore>,
    descriptor: Arc<SchemaDescriptor>,
    diagnostics: Arc<Diagnostics>,
    min_level: LogLevel,
    closed: Arc<AtomicBool>,
}

impl AuditSink {
    pub fn new(
        projector: RowProjector,
        store: Arc<dyn LogStore>,
        descriptor: Arc<SchemaDescriptor>,
        diagnostics: Arc<Diagnostics>,
        min_level: LogLevel,
    ) -> Self {
        Self {
            projector,
            store,
            descriptor,
            diagnostics,
            min_level,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 同步写入一个事件
    ///
    /// 在调用线程上完成投影和单行插入。存储确认之前不会返回 `Ok`。
    pub fn emit(&self, event: &LogEvent) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbSinkError::SinkClosed);
        }
        if event.level < self.min_level {
            return Ok(());
        }

        let row = self.projector.project(event)?;
        let written = self
            .store
            .insert_rows(&self.descriptor, std::slice::from_ref(&row))?;
        if written != 1 {
            return Err(DbSinkError::StructuralStore(format!(
                "store acknowledged {} rows for a single audit event",
                written
            )));
        }

        self.diagnostics.increment_events_accepted();
        self.diagnostics.record_batch_written(written);
        debug!(table = %self.descriptor.table(), "审计事件已写入");
        Ok(())
    }

    /// 在阻塞线程池中执行 [`emit`](Self::emit)
    pub async fn emit_async(&self, event: LogEvent) -> Result<()> {
        let sink = self.clone();
        tokio::task::spawn_blocking(move || sink.emit(&event))
            .await
            .map_err(|e| DbSinkError::background_task(format!("audit write task failed: {}", e)))?
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }
}

#[async_trait]
impl DbSink for AuditSink {
    fn emit(&self, event: &LogEvent) -> Result<()> {
        AuditSink::emit(self, event)
    }

    async fn send_event(&self, event: LogEvent) -> Result<()> {
        self.emit_async(event).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.ping().is_ok())
            .await
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "audit_database"
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn diagnostics(&self) -> Option<&Arc<Diagnostics>> {
        Some(&self.diagnostics)
    }

    fn stats(&self) -> String {
        let snapshot = self.diagnostics.snapshot();
        format!(
            "AuditSink: accepted={}, rows_written={}",
            snapshot.events_accepted, snapshot.rows_written
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::sinks::database::columns::ColumnMapping;
    use crate::sinks::database::memory::MemoryStore;
    use crate::sinks::database::projector::ValueFormatter;
    use crate::sinks::database::schema::TableName;

    fn table() -> TableName {
        TableName::new(Some("dbo"), "Audit")
    }

    fn audit(store: Arc<MemoryStore>) -> AuditSink {
        let mapping = ColumnMapping::standard();
        let descriptor = Arc::new(SchemaDescriptor::new(table(), &mapping).unwrap());
        AuditSink::new(
            RowProjector::new(mapping, ValueFormatter::default()),
            store,
            descriptor,
            Arc::new(Diagnostics::new()),
            LogLevel::Trace,
        )
    }

    #[test]
    fn test_emit_succeeds_after_store_acknowledges() {
        let store = Arc::new(MemoryStore::new().with_table(table()));
        let sink = audit(store.clone());

        sink.emit(&LogEvent::new(LogLevel::Info, "user deleted")).unwrap();
        assert_eq!(store.row_count(&table()), 1);
        assert_eq!(sink.diagnostics().snapshot().rows_written, 1);
    }

    #[test]
    fn test_emit_propagates_store_failure() {
        let store = Arc::new(MemoryStore::new().with_table(table()));
        store.fail_next(1, StoreError::transient("connection reset"));
        let sink = audit(store.clone());

        let err = sink.emit(&LogEvent::new(LogLevel::Info, "user deleted")).unwrap_err();
        assert!(matches!(err, DbSinkError::TransientStore(_)));
        assert_eq!(store.row_count(&table()), 0);

        // 审计 sink 不重试，下一次调用独立成功
        sink.emit(&LogEvent::new(LogLevel::Info, "user restored")).unwrap();
        assert_eq!(store.insert_calls(), 2);
    }

    #[test]
    fn test_emit_against_missing_table_fails() {
        let sink = audit(Arc::new(MemoryStore::new()));
        let err = sink.emit(&LogEvent::new(LogLevel::Warn, "orphan")).unwrap_err();
        assert!(matches!(err, DbSinkError::StructuralStore(_)));
    }

    #[tokio::test]
    async fn test_emit_async_and_shutdown() {
        let store = Arc::new(MemoryStore::new().with_table(table()));
        let sink = audit(store.clone());

        sink.emit_async(LogEvent::new(LogLevel::Error, "payment refunded")).await.unwrap();
        assert_eq!(store.row_count(&table()), 1);
        assert!(DbSink::is_healthy(&sink).await);

        DbSink::shutdown(&sink).await.unwrap();
        let err = sink.emit_async(LogEvent::new(LogLevel::Error, "late")).await.unwrap_err();
        assert!(matches!(err, DbSinkError::SinkClosed));
    }
}
