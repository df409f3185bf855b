//! 批量数据库 Sink
//!
//! 生产者调用 [`BatchingSink::emit`] 时只做投影和一次短暂的入队；所有存储 I/O
//! 都在 [`FlushScheduler`] 的后台任务中进行。写入失败不会传回生产者，
//! 而是通过诊断通道报告。

pub mod buffer;
pub mod scheduler;
pub mod writer;

pub use buffer::BatchBuffer;
pub use scheduler::{FlushScheduler, FlushTrigger, SchedulerState};
pub use writer::{BulkWriter, RetryPolicy};

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AfterShutdownPolicy;
use crate::core::event::{LogEvent, LogLevel};
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::{DbSinkError, Result};
use crate::sinks::database::projector::RowProjector;
use crate::sinks::traits::DbSink;

/// 批量 sink 的运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingOptions {
    pub batch_posting_limit: usize,
    pub period: Duration,
    /// 缓冲区软容量
    pub queue_limit: usize,
    pub min_level: LogLevel,
    pub after_shutdown: AfterShutdownPolicy,
    /// 停机时等待最后一次刷新的时间
    pub shutdown_timeout: Duration,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            batch_posting_limit: 50,
            period: Duration::from_secs(5),
            queue_limit: 100_000,
            min_level: LogLevel::Trace,
            after_shutdown: AfterShutdownPolicy::Reject,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// 批量数据库 Sink
#[derive(Debug)]
pub struct BatchingSink {
    projector: RowProjector,
    buffer: Arc<BatchBuffer>,
    scheduler: FlushScheduler,
    diagnostics: Arc<Diagnostics>,
    options: BatchingOptions,
    /// 停机标志；生产者持读锁完成检查与入队，停机持写锁置位
    closed: RwLock<bool>,
}

impl BatchingSink {
    /// 创建批量 sink 并启动刷新任务
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn new(
        projector: RowProjector,
        writer: BulkWriter,
        options: BatchingOptions,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let buffer = Arc::new(BatchBuffer::new(
            options.batch_posting_limit,
            options.queue_limit,
            diagnostics.clone(),
        ));
        let scheduler = FlushScheduler::spawn(buffer.clone(), writer, options.period);

        info!(
            batch_posting_limit = options.batch_posting_limit,
            period_ms = options.period.as_millis() as u64,
            "批量数据库 sink 已启动"
        );

        Self {
            projector,
            buffer,
            scheduler,
            diagnostics,
            options,
            closed: RwLock::new(false),
        }
    }

    /// 接收一个事件
    ///
    /// 低于最低级别的事件被忽略。投影失败的事件被丢弃并报告，不返回错误。
    /// 停机后的行为由 `AfterShutdownPolicy` 决定。
    pub fn emit(&self, event: &LogEvent) -> Result<()> {
        if event.level < self.options.min_level {
            return Ok(());
        }

        let row = match self.projector.project(event) {
            Ok(row) => row,
            Err(e) => {
                self.diagnostics.report(DiagnosticEvent::EventDropped {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        let closed = self.closed.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *closed {
            return match self.options.after_shutdown {
                AfterShutdownPolicy::Reject => Err(DbSinkError::SinkClosed),
                AfterShutdownPolicy::BestEffort => {
                    self.diagnostics.report(DiagnosticEvent::EventDropped {
                        reason: "sink is shut down".to_string(),
                    });
                    Ok(())
                }
            };
        }

        self.buffer.enqueue(row);
        self.diagnostics.increment_events_accepted();
        Ok(())
    }

    /// 立即刷新缓冲区并等待写入完成
    pub async fn flush(&self) -> Result<()> {
        self.scheduler.flush().await
    }

    /// 停止接收事件，执行最后一次刷新
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut closed = self.closed.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *closed {
                debug!("批量数据库 sink 已经停止");
            }
            *closed = true;
        }
        self.scheduler.stop(self.options.shutdown_timeout).await
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// 当前缓冲的行数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn options(&self) -> &BatchingOptions {
        &self.options
    }
}

#[async_trait]
impl DbSink for BatchingSink {
    fn emit(&self, event: &LogEvent) -> Result<()> {
        BatchingSink::emit(self, event)
    }

    async fn send_event(&self, event: LogEvent) -> Result<()> {
        BatchingSink::emit(self, &event)
    }

    async fn flush(&self) -> Result<()> {
        BatchingSink::flush(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        BatchingSink::shutdown(self).await
    }

    async fn is_healthy(&self) -> bool {
        !self.is_closed() && self.state() != SchedulerState::Stopped
    }

    fn name(&self) -> &'static str {
        "batching_database"
    }

    fn min_level(&self) -> LogLevel {
        self.options.min_level
    }

    fn diagnostics(&self) -> Option<&Arc<Diagnostics>> {
        Some(&self.diagnostics)
    }

    fn stats(&self) -> String {
        let snapshot = self.diagnostics.snapshot();
        format!(
            "BatchingSink: state={:?}, buffered={}, accepted={}, rows_written={}, batches_failed={}",
            self.state(),
            self.buffered(),
            snapshot.events_accepted,
            snapshot.rows_written,
            snapshot.batches_failed
        )
    }
}
