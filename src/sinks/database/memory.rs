//! 内存存储
//!
//! 不依赖数据库的 `LogStore` 实现，可以注入故障并记录调用情况，
//! 用于测试和没有启用任何数据库后端的场景。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::models::Row;
use super::schema::{SchemaDescriptor, TableName};
use super::store::LogStore;
use crate::config::DatabaseType;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<TableName, Vec<Row>>,
    ddl: Vec<String>,
    insert_calls: usize,
    queued_failures: VecDeque<StoreError>,
    persistent_failure: Option<StoreError>,
    ddl_rejection: Option<String>,
    insert_delay: Option<Duration>,
}

/// 内存中的日志存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    dialect: DatabaseType,
    state: Mutex<MemoryState>,
    active_inserts: AtomicUsize,
    max_concurrent_inserts: AtomicUsize,
}

/// 插入结束时递减并发计数
struct ActiveInsert<'a>(&'a AtomicUsize);

impl Drop for ActiveInsert<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定方言渲染 DDL
    pub fn with_dialect(dialect: DatabaseType) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// 预先放入一张空表，模拟已存在的目标表
    pub fn with_table(self, table: TableName) -> Self {
        self.lock().tables.entry(table).or_default();
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // 持锁期间不会 panic，中毒时继续使用内部数据
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 接下来的 `count` 次插入返回给定错误
    pub fn fail_next(&self, count: usize, error: StoreError) {
        let mut state = self.lock();
        for _ in 0..count {
            state.queued_failures.push_back(error.clone());
        }
    }

    /// 之后所有插入都返回给定错误，直到 `clear_failures`
    pub fn fail_always(&self, error: StoreError) {
        self.lock().persistent_failure = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.queued_failures.clear();
        state.persistent_failure = None;
    }

    /// 拒绝之后的建表请求
    pub fn reject_ddl(&self, message: impl Into<String>) {
        self.lock().ddl_rejection = Some(message.into());
    }

    /// 每次插入前等待，用于观察并发与停机行为
    pub fn set_insert_delay(&self, delay: Duration) {
        self.lock().insert_delay = Some(delay);
    }

    pub fn has_table(&self, table: &TableName) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn rows(&self, table: &TableName) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &TableName) -> usize {
        self.lock().tables.get(table).map(Vec::len).unwrap_or(0)
    }

    pub fn ddl_statements(&self) -> Vec<String> {
        self.lock().ddl.clone()
    }

    pub fn ddl_count(&self) -> usize {
        self.lock().ddl.len()
    }

    /// 插入调用次数，包括失败的调用
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    /// 观察到的最大并发插入数
    pub fn max_concurrent_inserts(&self) -> usize {
        self.max_concurrent_inserts.load(Ordering::SeqCst)
    }
}

impl LogStore for MemoryStore {
    fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, StoreError> {
        Ok(self.has_table(table))
    }

    fn create_table(&self, descriptor: &SchemaDescriptor) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(message) = &state.ddl_rejection {
            return Err(StoreError::structural(message.clone()));
        }

        if let Some(sql) = descriptor.create_schema_sql(self.dialect) {
            state.ddl.push(sql);
        }
        state.ddl.push(descriptor.create_table_sql(self.dialect));
        state.tables.entry(descriptor.table().clone()).or_default();
        Ok(())
    }

    fn insert_rows(&self, descriptor: &SchemaDescriptor, rows: &[Row]) -> Result<usize, StoreError> {
        let active = self.active_inserts.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveInsert(&self.active_inserts);
        self.max_concurrent_inserts.fetch_max(active, Ordering::SeqCst);

        let delay = self.lock().insert_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        state.insert_calls += 1;

        if let Some(error) = state.queued_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.persistent_failure {
            return Err(error.clone());
        }

        let width = descriptor.writable_columns().count();
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(StoreError::structural(format!(
                "row has {} values but the table expects {}",
                row.len(),
                width
            )));
        }
        let parameters = rows.len() * width;
        if parameters > self.dialect.max_bind_parameters() {
            return Err(StoreError::structural(format!(
                "too many SQL variables: {} exceeds {}",
                parameters,
                self.dialect.max_bind_parameters()
            )));
        }

        let table = state
            .tables
            .get_mut(descriptor.table())
            .ok_or_else(|| StoreError::structural(format!("no such table: {}", descriptor.table())))?;
        table.extend_from_slice(rows);
        Ok(rows.len())
    }
}
