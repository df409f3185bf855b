//! QuantumLog DB - 关系型数据库日志 Sink
//!
//! 把结构化日志事件写入关系型数据库表，提供两种投递语义：
//!
//! - **批量 sink**：生产者只做投影和入队，后台任务在周期到期或缓冲区达到批量阈值时
//!   写入，瞬时错误按指数退避重试，失败只通过诊断通道报告，不会影响应用
//! - **审计 sink**：每个事件同步写入，存储确认之前不返回成功，失败返回给调用方
//!
//! 支持 SQLite、MySQL 和 PostgreSQL（通过 `sqlite` / `mysql` / `postgres` 特性），
//! 也可以使用内存存储或自定义的 [`LogStore`] 实现。
//!
//! # 快速开始
//!
//! ```rust
//! use std::sync::Arc;
//! use quantum_log_db::{DbSinkBuilder, DbSinkConfig, LogEvent, LogLevel, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = DbSinkConfig::new("LogDb", "Logs");
//!     config.auto_create_table = true;
//!
//!     let sink = DbSinkBuilder::new(config)
//!         .store(Arc::new(MemoryStore::new()))
//!         .build_batching()
//!         .await?;
//!
//!     sink.emit(&LogEvent::new(LogLevel::Info, "Application started").with_property("UserId", 7))?;
//!
//!     // 优雅关闭，写出剩余事件
//!     sink.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # 与 tracing 集成
//!
//! ```rust
//! use std::sync::Arc;
//! use quantum_log_db::{DbSinkBuilder, DbSinkConfig, DbSinkLayer, MemoryStore};
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = DbSinkConfig::new("LogDb", "Logs");
//!     config.auto_create_table = true;
//!     let sink = Arc::new(
//!         DbSinkBuilder::new(config)
//!             .store(Arc::new(MemoryStore::new()))
//!             .build_batching()
//!             .await?,
//!     );
//!
//!     let subscriber = tracing_subscriber::registry().with(DbSinkLayer::new(sink.clone()));
//!     tracing::subscriber::with_default(subscriber, || {
//!         tracing::info!(order_id = 1001, "order created");
//!     });
//!
//!     sink.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod sinks;

// 重新导出主要类型
pub use builder::DbSinkBuilder;
pub use config::{
    load_config_from_file, load_config_from_str, load_config_layered, validate_config,
    AfterShutdownPolicy, ColumnsConfig, DatabaseType, DbSinkConfig, RetryConfig,
};
pub use connection::{
    resolve_connection_string, ConnectionRegistry, EnvConnectionRegistry, NamedConnections,
};
pub use core::event::{LogEvent, LogLevel};
pub use core::layer::DbSinkLayer;
pub use diagnostics::{DiagnosticEvent, Diagnostics, DiagnosticsSnapshot};
pub use error::{DbSinkError, Result, StoreError, StoreErrorKind};
pub use sinks::database::{
    merge_additional_columns, ColumnDefinition, ColumnMapping, ColumnOptions, LogStore,
    MemoryStore, RowProjector, SchemaDescriptor, SchemaProvisioner, SqlDataType, StandardColumn,
    TableName, ValueFormatter,
};
#[cfg(feature = "database")]
pub use sinks::database::DieselStore;
pub use sinks::{AuditSink, BatchingOptions, BatchingSink, DbSink};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
