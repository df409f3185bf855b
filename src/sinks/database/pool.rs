//! Diesel 存储实现
//!
//! 基于 r2d2 连接池的 `LogStore`，支持 SQLite、MySQL 和 PostgreSQL。
//! 每个操作从池中取出一个连接，操作结束（无论成功与否）即归还。
//! 行以多值 `INSERT` 一次写入，参数按列的声明类型绑定。

use chrono::NaiveDateTime;
use diesel::backend::Backend;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::serialize::ToSql;
use diesel::sql_types::{BigInt, Bool, Double, HasSqlType, Integer, Nullable, Text, Timestamp};
use std::time::Duration;
use tracing::debug;

use super::columns::{ColumnDefinition, SqlDataType};
use super::models::{CellValue, Row};
use super::schema::{SchemaDescriptor, TableName};
use super::store::LogStore;
use crate::config::DatabaseType;
use crate::error::{DbSinkError, StoreError};

/// 数据库连接池类型别名
#[cfg(feature = "sqlite")]
type SqlitePool = Pool<ConnectionManager<diesel::sqlite::SqliteConnection>>;

#[cfg(feature = "mysql")]
type MysqlPool = Pool<ConnectionManager<diesel::mysql::MysqlConnection>>;

#[cfg(feature = "postgres")]
type PostgresPool = Pool<ConnectionManager<diesel::pg::PgConnection>>;

/// 数据库连接池枚举
#[derive(Clone)]
enum StorePool {
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePool),
    #[cfg(feature = "mysql")]
    Mysql(MysqlPool),
    #[cfg(feature = "postgres")]
    Postgres(PostgresPool),
}

/// 从池中取出连接并以具体的后端类型执行代码块
macro_rules! with_backend {
    ($store:expr, $conn:ident, $db:ident => $body:block) => {
        match $store.pool {
            #[cfg(feature = "sqlite")]
            StorePool::Sqlite(ref pool) => {
                let mut $conn = pool.get().map_err(pool_error)?;
                #[allow(dead_code)]
                type $db = diesel::sqlite::Sqlite;
                $body
            }
            #[cfg(feature = "mysql")]
            StorePool::Mysql(ref pool) => {
                let mut $conn = pool.get().map_err(pool_error)?;
                #[allow(dead_code)]
                type $db = diesel::mysql::Mysql;
                $body
            }
            #[cfg(feature = "postgres")]
            StorePool::Postgres(ref pool) => {
                let mut $conn = pool.get().map_err(pool_error)?;
                #[allow(dead_code)]
                type $db = diesel::pg::Pg;
                $body
            }
        }
    };
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// 基于 Diesel 的日志存储
#[derive(Clone)]
pub struct DieselStore {
    pool: StorePool,
    dialect: DatabaseType,
}

impl std::fmt::Debug for DieselStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DieselStore")
            .field("dialect", &self.dialect)
            .field("pool", &"<StorePool>")
            .finish()
    }
}

impl DieselStore {
    /// 创建数据库连接池
    ///
    /// 阻塞调用：连接池在返回前建立初始连接。
    pub fn connect(
        db_type: DatabaseType,
        connection_string: &str,
        pool_size: u32,
        connection_timeout: Duration,
    ) -> Result<Self, DbSinkError> {
        let pool = match db_type {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => {
                let path = connection_string
                    .strip_prefix("sqlite://")
                    .unwrap_or(connection_string);
                let manager = ConnectionManager::<diesel::sqlite::SqliteConnection>::new(path);
                let pool = Pool::builder()
                    .max_size(pool_size)
                    .connection_timeout(connection_timeout)
                    .build(manager)
                    .map_err(|e| DbSinkError::TransientStore(format!("SQLite 连接池创建失败: {}", e)))?;
                StorePool::Sqlite(pool)
            }
            #[cfg(feature = "mysql")]
            DatabaseType::Mysql => {
                let manager = ConnectionManager::<diesel::mysql::MysqlConnection>::new(connection_string);
                let pool = Pool::builder()
                    .max_size(pool_size)
                    .connection_timeout(connection_timeout)
                    .build(manager)
                    .map_err(|e| DbSinkError::TransientStore(format!("MySQL 连接池创建失败: {}", e)))?;
                StorePool::Mysql(pool)
            }
            #[cfg(feature = "postgres")]
            DatabaseType::Postgresql => {
                let manager = ConnectionManager::<diesel::pg::PgConnection>::new(connection_string);
                let pool = Pool::builder()
                    .max_size(pool_size)
                    .connection_timeout(connection_timeout)
                    .build(manager)
                    .map_err(|e| {
                        DbSinkError::TransientStore(format!("PostgreSQL 连接池创建失败: {}", e))
                    })?;
                StorePool::Postgres(pool)
            }
            #[allow(unreachable_patterns)]
            other => return Err(DbSinkError::FeatureNotEnabled(other.feature_name().to_string())),
        };

        debug!(dialect = ?db_type, pool_size, "数据库连接池已创建");
        Ok(Self {
            pool,
            dialect: db_type,
        })
    }
}

impl LogStore for DieselStore {
    fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, StoreError> {
        let (sql, params) = table_exists_query(self.dialect, table);

        with_backend!(self, conn, Db => {
            let mut query = diesel::sql_query(sql).into_boxed::<Db>();
            for param in params {
                query = query.bind::<Text, _>(param);
            }
            let row = query.get_result::<CountRow>(&mut conn).map_err(classify)?;
            Ok(row.count > 0)
        })
    }

    fn create_table(&self, descriptor: &SchemaDescriptor) -> Result<(), StoreError> {
        let schema_sql = descriptor.create_schema_sql(self.dialect);
        let table_sql = descriptor.create_table_sql(self.dialect);

        with_backend!(self, conn, Db => {
            if let Some(sql) = schema_sql {
                diesel::sql_query(sql).execute(&mut conn).map_err(classify)?;
            }
            diesel::sql_query(table_sql).execute(&mut conn).map_err(classify)?;
            Ok(())
        })
    }

    fn insert_rows(&self, descriptor: &SchemaDescriptor, rows: &[Row]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns: Vec<&ColumnDefinition> = descriptor.writable_columns().collect();
        let sql = descriptor.insert_sql(self.dialect, rows.len());

        with_backend!(self, conn, Db => {
            let mut query = diesel::sql_query(sql).into_boxed::<Db>();
            for row in rows {
                if row.len() != columns.len() {
                    return Err(StoreError::structural(format!(
                        "row has {} values but the table expects {}",
                        row.len(),
                        columns.len()
                    )));
                }
                for (column, value) in columns.iter().zip(row.values()) {
                    query = bind_cell(query, column, value)?;
                }
            }
            query.execute(&mut conn).map_err(classify)
        })
    }

    fn ping(&self) -> Result<(), StoreError> {
        with_backend!(self, conn, Db => {
            let _ = &mut conn;
            Ok(())
        })
    }
}

fn table_exists_query(dialect: DatabaseType, table: &TableName) -> (&'static str, Vec<String>) {
    match (dialect, &table.schema) {
        (DatabaseType::Sqlite, _) => (
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            vec![table.table.clone()],
        ),
        (DatabaseType::Postgresql, Some(schema)) => (
            "SELECT COUNT(*) AS count FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
            vec![schema.clone(), table.table.clone()],
        ),
        (DatabaseType::Postgresql, None) => (
            "SELECT COUNT(*) AS count FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1",
            vec![table.table.clone()],
        ),
        (DatabaseType::Mysql, Some(schema)) => (
            "SELECT COUNT(*) AS count FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            vec![schema.clone(), table.table.clone()],
        ),
        (DatabaseType::Mysql, None) => (
            "SELECT COUNT(*) AS count FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
            vec![table.table.clone()],
        ),
    }
}

/// 按列的声明类型绑定一个单元格
fn bind_cell<DB>(
    query: BoxedSqlQuery<'static, DB, SqlQuery>,
    column: &ColumnDefinition,
    value: &CellValue,
) -> Result<BoxedSqlQuery<'static, DB, SqlQuery>, StoreError>
where
    DB: Backend
        + HasSqlType<Text>
        + HasSqlType<Integer>
        + HasSqlType<BigInt>
        + HasSqlType<Double>
        + HasSqlType<Bool>
        + HasSqlType<Timestamp>,
    Option<String>: ToSql<Nullable<Text>, DB>,
    Option<i32>: ToSql<Nullable<Integer>, DB>,
    Option<i64>: ToSql<Nullable<BigInt>, DB>,
    Option<f64>: ToSql<Nullable<Double>, DB>,
    Option<bool>: ToSql<Nullable<Bool>, DB>,
    Option<NaiveDateTime>: ToSql<Nullable<Timestamp>, DB>,
{
    let mismatch = || {
        StoreError::structural(format!(
            "value {:?} does not match column '{}' of type {:?}",
            value, column.name, column.data_type
        ))
    };

    let query = match (column.data_type, value) {
        (SqlDataType::Text, CellValue::Null) => query.bind::<Nullable<Text>, _>(None::<String>),
        (SqlDataType::Text, CellValue::Text(s)) => query.bind::<Nullable<Text>, _>(Some(s.clone())),
        (SqlDataType::Integer, CellValue::Null) => query.bind::<Nullable<Integer>, _>(None::<i32>),
        (SqlDataType::Integer, CellValue::Integer(n)) => {
            let n = i32::try_from(*n).map_err(|_| mismatch())?;
            query.bind::<Nullable<Integer>, _>(Some(n))
        }
        (SqlDataType::BigInt, CellValue::Null) => query.bind::<Nullable<BigInt>, _>(None::<i64>),
        (SqlDataType::BigInt, CellValue::Integer(n)) => query.bind::<Nullable<BigInt>, _>(Some(*n)),
        (SqlDataType::Float, CellValue::Null) => query.bind::<Nullable<Double>, _>(None::<f64>),
        (SqlDataType::Float, CellValue::Float(f)) => query.bind::<Nullable<Double>, _>(Some(*f)),
        (SqlDataType::Float, CellValue::Integer(n)) => query.bind::<Nullable<Double>, _>(Some(*n as f64)),
        (SqlDataType::Boolean, CellValue::Null) => query.bind::<Nullable<Bool>, _>(None::<bool>),
        (SqlDataType::Boolean, CellValue::Boolean(b)) => query.bind::<Nullable<Bool>, _>(Some(*b)),
        (SqlDataType::Timestamp, CellValue::Null) => {
            query.bind::<Nullable<Timestamp>, _>(None::<NaiveDateTime>)
        }
        (SqlDataType::Timestamp, CellValue::Timestamp(ts)) => {
            query.bind::<Nullable<Timestamp>, _>(Some(*ts))
        }
        _ => return Err(mismatch()),
    };
    Ok(query)
}

fn pool_error(err: diesel::r2d2::PoolError) -> StoreError {
    StoreError::transient(format!("failed to acquire connection: {}", err))
}

/// 将 Diesel 错误分类为可重试或结构性错误
fn classify(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(kind, info) => {
            let message = info.message().to_string();
            match kind {
                DatabaseErrorKind::SerializationFailure | DatabaseErrorKind::ClosedConnection => {
                    StoreError::transient(message)
                }
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation => StoreError::structural(message),
                _ if looks_transient(&message) => StoreError::transient(message),
                _ => StoreError::structural(message),
            }
        }
        other => StoreError::structural(other.to_string()),
    }
}

/// 按驱动消息识别锁竞争与超时
///
/// 短语必须从词首开始匹配，"blocked" 不算 "locked"。
fn looks_transient(message: &str) -> bool {
    let words: Vec<String> = message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    let normalized = format!(" {}", words.join(" "));

    [
        "deadlock",
        "locked",
        "lock wait",
        "could not obtain lock",
        "timeout",
        "timed out",
        "connection",
        "busy",
    ]
    .iter()
    .any(|needle| normalized.contains(&format!(" {}", needle)))
}
