//! 目标表结构与建表
//!
//! `SchemaDescriptor` 在 sink 构造时从列映射派生一次，之后不可变。它为每种数据库
//! 方言渲染 `CREATE TABLE` 与参数化的 `INSERT` 语句。`SchemaProvisioner` 负责在
//! 启动时确认目标表存在，必要时创建它。

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::columns::{validate_identifier, ColumnDefinition, ColumnMapping, SqlDataType};
use super::store::LogStore;
use crate::config::DatabaseType;
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::{DbSinkError, Result};

/// 带可选 schema 的表名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    /// 空的 schema 视为未指定
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            table: table.trim().to_string(),
        }
    }

    /// 在给定方言下的限定名称（SQLite 忽略 schema）
    pub fn qualified(&self, dialect: DatabaseType) -> String {
        match (&self.schema, dialect.supports_schemas()) {
            (Some(schema), true) => format!(
                "{}.{}",
                quote_identifier(schema, dialect),
                quote_identifier(&self.table, dialect)
            ),
            _ => quote_identifier(&self.table, dialect),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// 按方言引用标识符。标识符已校验过，不包含引号字符。
pub fn quote_identifier(name: &str, dialect: DatabaseType) -> String {
    match dialect {
        DatabaseType::Mysql => format!("`{}`", name),
        DatabaseType::Sqlite | DatabaseType::Postgresql => format!("\"{}\"", name),
    }
}

/// 目标表的结构描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    table: TableName,
    columns: Vec<ColumnDefinition>,
}

impl SchemaDescriptor {
    pub fn new(table: TableName, mapping: &ColumnMapping) -> Result<Self> {
        validate_identifier(&table.table, "table")?;
        if let Some(schema) = &table.schema {
            validate_identifier(schema, "schema")?;
        }

        Ok(Self {
            table,
            columns: mapping.columns().to_vec(),
        })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// 出现在 INSERT 中的列，顺序与投影出的行一致
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| !c.is_generated())
    }

    /// 建 schema 的语句；SQLite 不需要
    pub fn create_schema_sql(&self, dialect: DatabaseType) -> Option<String> {
        let schema = self.table.schema.as_ref()?;
        match dialect {
            DatabaseType::Sqlite => None,
            DatabaseType::Postgresql => Some(format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_identifier(schema, dialect)
            )),
            DatabaseType::Mysql => Some(format!(
                "CREATE DATABASE IF NOT EXISTS {}",
                quote_identifier(schema, dialect)
            )),
        }
    }

    pub fn create_table_sql(&self, dialect: DatabaseType) -> String {
        let definitions: Vec<String> = self
            .columns
            .iter()
            .map(|column| column_ddl(column, dialect))
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table.qualified(dialect),
            definitions.join(", ")
        )
    }

    /// 一条 INSERT 最多能写入的行数，受后端绑定参数上限约束
    pub fn max_rows_per_insert(&self, dialect: DatabaseType) -> usize {
        let width = self.writable_columns().count().max(1);
        (dialect.max_bind_parameters() / width).max(1)
    }

    /// 多行参数化 INSERT
    pub fn insert_sql(&self, dialect: DatabaseType, rows: usize) -> String {
        let names: Vec<String> = self
            .writable_columns()
            .map(|c| quote_identifier(&c.name, dialect))
            .collect();
        let width = names.len();

        let mut param = 0usize;
        let tuples: Vec<String> = (0..rows)
            .map(|_| {
                let placeholders: Vec<String> = (0..width)
                    .map(|_| {
                        param += 1;
                        match dialect {
                            DatabaseType::Postgresql => format!("${}", param),
                            DatabaseType::Sqlite | DatabaseType::Mysql => "?".to_string(),
                        }
                    })
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table.qualified(dialect),
            names.join(", "),
            tuples.join(", ")
        )
    }
}

fn column_ddl(column: &ColumnDefinition, dialect: DatabaseType) -> String {
    let name = quote_identifier(&column.name, dialect);

    if column.is_generated() {
        let identity = match (dialect, column.data_type) {
            (DatabaseType::Sqlite, _) => "INTEGER PRIMARY KEY AUTOINCREMENT",
            (DatabaseType::Postgresql, SqlDataType::Integer) => "SERIAL PRIMARY KEY",
            (DatabaseType::Postgresql, _) => "BIGSERIAL PRIMARY KEY",
            (DatabaseType::Mysql, SqlDataType::Integer) => "INT AUTO_INCREMENT PRIMARY KEY",
            (DatabaseType::Mysql, _) => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        };
        return format!("{} {}", name, identity);
    }

    let sql_type = match (column.data_type, dialect) {
        (SqlDataType::Text, DatabaseType::Sqlite) => "TEXT".to_string(),
        (SqlDataType::Text, _) => match column.max_length {
            Some(len) => format!("VARCHAR({})", len),
            None => "TEXT".to_string(),
        },
        (SqlDataType::Integer, DatabaseType::Mysql) => "INT".to_string(),
        (SqlDataType::Integer, _) => "INTEGER".to_string(),
        (SqlDataType::BigInt, DatabaseType::Sqlite) => "INTEGER".to_string(),
        (SqlDataType::BigInt, _) => "BIGINT".to_string(),
        (SqlDataType::Float, DatabaseType::Sqlite) => "REAL".to_string(),
        (SqlDataType::Float, DatabaseType::Postgresql) => "DOUBLE PRECISION".to_string(),
        (SqlDataType::Float, DatabaseType::Mysql) => "DOUBLE".to_string(),
        (SqlDataType::Boolean, DatabaseType::Sqlite) => "INTEGER".to_string(),
        (SqlDataType::Boolean, _) => "BOOLEAN".to_string(),
        (SqlDataType::Timestamp, DatabaseType::Sqlite) => "TEXT".to_string(),
        (SqlDataType::Timestamp, DatabaseType::Postgresql) => "TIMESTAMP".to_string(),
        (SqlDataType::Timestamp, DatabaseType::Mysql) => "DATETIME(6)".to_string(),
    };

    if column.nullable {
        format!("{} {}", name, sql_type)
    } else {
        format!("{} {} NOT NULL", name, sql_type)
    }
}

/// 建表检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// 表已存在，未执行任何 DDL
    AlreadyExists,
    /// 表由本次调用创建
    Created,
    /// 表不存在且未启用自动建表
    Missing,
}

/// 启动时确认目标表存在
#[derive(Debug, Clone)]
pub struct SchemaProvisioner {
    store: Arc<dyn LogStore>,
    auto_create: bool,
    diagnostics: Arc<Diagnostics>,
}

impl SchemaProvisioner {
    pub fn new(store: Arc<dyn LogStore>, auto_create: bool, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            store,
            auto_create,
            diagnostics,
        }
    }

    /// 检查表是否存在，不存在且允许时创建
    ///
    /// 已存在的表不会被修改。DDL 被拒绝时返回 `Schema` 错误，不重试。
    /// 阻塞调用，异步上下文中应放在 `spawn_blocking` 里执行。
    pub fn ensure_table(&self, descriptor: &SchemaDescriptor) -> Result<ProvisionOutcome> {
        let table = descriptor.table();

        let exists = self.store.table_exists(table).map_err(|e| {
            DbSinkError::schema(format!("failed to inspect table {}: {}", table, e.message))
        })?;
        if exists {
            debug!(table = %table, "目标表已存在");
            return Ok(ProvisionOutcome::AlreadyExists);
        }

        if !self.auto_create {
            self.diagnostics.report(DiagnosticEvent::TableMissing {
                table: table.to_string(),
            });
            return Ok(ProvisionOutcome::Missing);
        }

        self.store.create_table(descriptor).map_err(|e| {
            DbSinkError::schema(format!("failed to create table {}: {}", table, e.message))
        })?;
        info!(table = %table, columns = descriptor.columns().len(), "已创建目标表");
        Ok(ProvisionOutcome::Created)
    }
}
