//! 数据库 sink 的诊断通道（self-log）。
//!
//! 非致命的状况（缓冲区增长、批次写入失败、连接名未找到等）不会抛给日志调用方，
//! 而是通过这里报告：计数器累加、写一条 `tracing` 日志，并可选地回调监听器。
//! 每个 sink 持有自己的 `Arc<Diagnostics>`，不使用全局实例。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// 诊断事件使用的 tracing target，日志层据此忽略自身产生的事件
pub const SELF_LOG_TARGET: &str = "quantum_log_db::selflog";

/// 通过诊断通道报告的状况
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// 缓冲区超过软容量，事件仍被接受
    BufferOverflow { buffered: usize, capacity: usize },
    /// 批次在重试耗尽或结构性错误后被丢弃
    BatchFailed {
        rows: usize,
        attempts: u32,
        error: String,
    },
    /// 写入器安排了一次重试
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// 单个事件被丢弃（投影失败或 sink 已停止）
    EventDropped { reason: String },
    /// 连接名称在注册表中未找到，按字面值使用
    ConnectionStringNotFound { name: String },
    /// 目标表不存在且未启用自动建表
    TableMissing { table: String },
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::BufferOverflow { buffered, capacity } => write!(
                f,
                "buffer holds {} rows, above its capacity of {}; events are still accepted",
                buffered, capacity
            ),
            DiagnosticEvent::BatchFailed {
                rows,
                attempts,
                error,
            } => write!(
                f,
                "dropping batch of {} rows after {} attempt(s): {}",
                rows, attempts, error
            ),
            DiagnosticEvent::RetryScheduled {
                attempt,
                delay,
                error,
            } => write!(
                f,
                "attempt {} failed, retrying in {}ms: {}",
                attempt,
                delay.as_millis(),
                error
            ),
            DiagnosticEvent::EventDropped { reason } => write!(f, "event dropped: {}", reason),
            DiagnosticEvent::ConnectionStringNotFound { name } => write!(
                f,
                "named connection '{}' not found, using the value as a literal connection string",
                name
            ),
            DiagnosticEvent::TableMissing { table } => write!(
                f,
                "table {} does not exist and auto-create is disabled",
                table
            ),
        }
    }
}

/// 诊断事件监听器
pub type DiagnosticListener = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// 内部诊断与指标数据结构。
///
/// 使用原子操作确保线程安全。
#[derive(Default)]
pub struct Diagnostics {
    start_time: Option<Instant>,
    events_accepted: AtomicU64,
    events_dropped: AtomicU64,
    rows_written: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    retries: AtomicU64,
    buffer_overflows: AtomicU64,
    listener: Option<DiagnosticListener>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("snapshot", &self.snapshot())
            .field("listener", &self.listener.as_ref().map(|_| "<listener>"))
            .finish()
    }
}

/// 诊断数据的快照，用于外部查询。
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsSnapshot {
    pub uptime: Option<Duration>,
    /// 被缓冲区或审计 sink 接受的事件数
    pub events_accepted: u64,
    /// 因投影失败或停机而丢弃的事件数
    pub events_dropped: u64,
    /// 已成功写入的行数
    pub rows_written: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub buffer_overflows: u64,
}

impl Diagnostics {
    /// 创建新的诊断实例。
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// 创建带监听器的诊断实例
    pub fn with_listener(listener: DiagnosticListener) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new()
        }
    }

    /// 报告一个诊断事件
    ///
    /// 更新对应的计数器，写一条 tracing 日志并通知监听器。从不返回错误。
    pub fn report(&self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::BufferOverflow { .. } => {
                self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
                warn!(target: SELF_LOG_TARGET, "{}", event);
            }
            DiagnosticEvent::BatchFailed { .. } => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
                error!(target: SELF_LOG_TARGET, "{}", event);
            }
            DiagnosticEvent::RetryScheduled { .. } => {
                self.retries.fetch_add(1, Ordering::Relaxed);
                warn!(target: SELF_LOG_TARGET, "{}", event);
            }
            DiagnosticEvent::EventDropped { .. } => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: SELF_LOG_TARGET, "{}", event);
            }
            DiagnosticEvent::ConnectionStringNotFound { .. }
            | DiagnosticEvent::TableMissing { .. } => {
                warn!(target: SELF_LOG_TARGET, "{}", event);
            }
        }

        if let Some(listener) = &self.listener {
            listener(&event);
        }
    }

    pub fn increment_events_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次成功的批量写入
    pub fn record_batch_written(&self, rows: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// 获取诊断数据的快照。
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            uptime: self.start_time.map(|start| start.elapsed()),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器（主要用于测试）。
    pub fn reset(&self) {
        self.events_accepted.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.rows_written.store(0, Ordering::Relaxed);
        self.batches_written.store(0, Ordering::Relaxed);
        self.batches_failed.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.buffer_overflows.store(0, Ordering::Relaxed);
    }
}
