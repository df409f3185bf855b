//! 数据库 Sink 模块
//!
//! 此模块提供列映射、行投影、表结构和存储后端。存储后端支持 SQLite、MySQL 和
//! PostgreSQL（`database` 特性），以及不依赖数据库的内存实现。

pub mod column_options;
pub mod columns;
pub mod memory;
pub mod models;
#[cfg(feature = "database")]
pub mod pool;
pub mod projector;
pub mod schema;
pub mod store;

pub use column_options::{AdditionalColumnConfig, ColumnOptions};
pub use columns::{
    merge_additional_columns, ColumnDefinition, ColumnKind, ColumnMapping, SqlDataType,
    StandardColumn,
};
pub use memory::MemoryStore;
pub use models::{Batch, CellValue, Row};
#[cfg(feature = "database")]
pub use pool::DieselStore;
pub use projector::{RowProjector, ValueFormatter};
pub use schema::{ProvisionOutcome, SchemaDescriptor, SchemaProvisioner, TableName};
pub use store::LogStore;
