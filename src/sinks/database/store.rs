//! 存储抽象
//!
//! `LogStore` 是 sink 与具体数据库之间的边界。所有方法都是阻塞的，每次调用自行
//! 获取并释放连接；异步调用方通过 `spawn_blocking` 使用它。

use std::fmt::Debug;

use super::models::Row;
use super::schema::{SchemaDescriptor, TableName};
use crate::config::DatabaseType;
use crate::error::StoreError;

/// 日志存储后端
///
/// 实现必须是线程安全的：审计 sink 的多个调用方和批量 sink 的刷新任务
/// 可能同时使用同一个实例。
pub trait LogStore: Send + Sync + Debug {
    /// 后端使用的 SQL 方言
    fn dialect(&self) -> DatabaseType;

    /// 查询表元数据
    fn table_exists(&self, table: &TableName) -> Result<bool, StoreError>;

    /// 创建 schema（如适用）和表
    fn create_table(&self, descriptor: &SchemaDescriptor) -> Result<(), StoreError>;

    /// 在一个语句中插入所有行，返回写入的行数
    ///
    /// 行中单元格的顺序与 `descriptor.writable_columns()` 一致。
    fn insert_rows(&self, descriptor: &SchemaDescriptor, rows: &[Row]) -> Result<usize, StoreError>;

    /// 检查后端是否可用
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
