//! 数据库 Sinks 模块
//!
//! 提供两种投递语义的数据库 sink：
//!
//! - [`BatchingSink`]：生产者只入队，后台任务按周期或批量阈值写入，失败通过诊断通道报告
//! - [`AuditSink`]：每个事件同步写入，失败返回给调用方
//!
//! 两者共享 [`database`] 模块中的列映射、行投影、表结构和存储后端。

pub mod audit;
pub mod batching;
pub mod database;
pub mod traits;

// 重新导出主要类型
pub use audit::AuditSink;
pub use batching::{BatchingOptions, BatchingSink};
pub use traits::DbSink;
