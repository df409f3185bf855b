//! Sink Traits
//!
//! 定义了数据库 sink 的统一接口。批量 sink 与审计 sink 都实现 [`DbSink`]，
//! `tracing` 层通过它分发事件，而不关心具体的投递语义。
//!
//! # 使用示例
//!
//! ```rust
//! use quantum_log_db::sinks::traits::DbSink;
//! use quantum_log_db::core::event::{LogEvent, LogLevel};
//! use quantum_log_db::error::Result;
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct CountingSink {
//!     count: std::sync::atomic::AtomicUsize,
//! }
//!
//! #[async_trait]
//! impl DbSink for CountingSink {
//!     fn emit(&self, _event: &LogEvent) -> Result<()> {
//!         self.count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         Ok(())
//!     }
//!
//!     async fn send_event(&self, event: LogEvent) -> Result<()> {
//!         self.emit(&event)
//!     }
//!
//!     async fn shutdown(&self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "counting"
//!     }
//!
//!     fn min_level(&self) -> LogLevel {
//!         LogLevel::Info
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::event::{LogEvent, LogLevel};
use crate::diagnostics::Diagnostics;
use crate::error::Result;

/// 数据库 Sink trait
///
/// 所有数据库 sink 都必须实现此 trait。
#[async_trait]
pub trait DbSink: Send + Sync + Debug {
    /// 在调用线程上同步接收事件
    ///
    /// 批量 sink 只入队，从不阻塞在 I/O 上；审计 sink 在返回前完成写入。
    fn emit(&self, event: &LogEvent) -> Result<()>;

    /// 在异步上下文中接收事件
    ///
    /// 实现不应在此方法中阻塞运行时线程。
    async fn send_event(&self, event: LogEvent) -> Result<()>;

    /// 写出所有已接收的事件
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// 优雅关闭 sink
    ///
    /// 关闭后再收到的事件按各 sink 的停机策略处理。
    async fn shutdown(&self) -> Result<()>;

    /// 检查 sink 是否健康
    async fn is_healthy(&self) -> bool {
        true
    }

    /// 获取 sink 的名称
    fn name(&self) -> &'static str;

    /// 此 sink 接受的最低级别
    fn min_level(&self) -> LogLevel;

    /// sink 自身的诊断实例，外层拒绝事件时向它报告
    fn diagnostics(&self) -> Option<&Arc<Diagnostics>> {
        None
    }

    /// 获取 sink 的统计信息
    fn stats(&self) -> String {
        format!("Sink: {}, Status: Healthy", self.name())
    }
}
