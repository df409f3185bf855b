//! 定义数据库日志 sink 的配置结构体。
//!
//! 配置可以从 TOML 字符串或文件加载，也可以叠加环境变量覆盖
//! （`QUANTUM_DB_` 前缀，嵌套字段用 `__` 分隔，例如 `QUANTUM_DB_RETRY__MAX_ATTEMPTS`）。

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::event::LogLevel;
use crate::error::{DbSinkError, Result};
use crate::sinks::database::column_options::AdditionalColumnConfig;
use crate::sinks::database::columns::{validate_identifier, ColumnMapping, StandardColumn};
use crate::sinks::database::projector::ValueFormatter;
use crate::sinks::database::schema::TableName;

/// 环境变量覆盖使用的前缀
pub const ENV_PREFIX: &str = "QUANTUM_DB";

// --- 辅助函数，用于提供配置项的默认值 ---
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_level() -> String {
    "TRACE".to_string()
}
fn default_db_table_name() -> String {
    "Logs".to_string()
}
fn default_db_schema_name() -> String {
    "dbo".to_string()
}
fn default_db_pool_size() -> u32 {
    5
}
fn default_db_connection_timeout_ms() -> u64 {
    5000
}
fn default_batch_posting_limit() -> usize {
    50
}
fn default_period_ms() -> u64 {
    5000
}
fn default_queue_limit() -> usize {
    100_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    10_000
}

/// 支持的数据库类型。
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DatabaseType {
    #[default]
    Sqlite,
    Mysql,
    Postgresql,
}

impl DatabaseType {
    /// 启用该后端所需的 cargo feature
    pub fn feature_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Mysql => "mysql",
            DatabaseType::Postgresql => "postgres",
        }
    }

    /// 后端是否支持独立于数据库的 schema
    pub fn supports_schemas(&self) -> bool {
        !matches!(self, DatabaseType::Sqlite)
    }

    /// 单条语句允许的最多绑定参数个数
    pub fn max_bind_parameters(&self) -> usize {
        match self {
            DatabaseType::Sqlite => 32_766,
            DatabaseType::Mysql | DatabaseType::Postgresql => 65_535,
        }
    }
}

/// sink 停止后再收到事件时的处理策略。
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfterShutdownPolicy {
    /// 立即返回 `SinkClosed` 错误。
    #[default]
    Reject,
    /// 接受调用，丢弃事件并通过诊断通道报告。
    BestEffort,
}

/// 批量写入的重试配置
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// 总尝试次数，包含第一次
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// 列映射配置
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ColumnsConfig {
    /// 是否以默认标准列集合为基础
    #[serde(default = "default_true")]
    pub use_standard_columns: bool,
    /// 从默认集合中移除的标准列
    #[serde(default)]
    pub remove_standard_columns: Vec<StandardColumn>,
    /// 额外启用的标准列（例如 `log_event`、`trace_id`）
    #[serde(default)]
    pub add_standard_columns: Vec<StandardColumn>,
    #[serde(default)]
    pub additional_columns: Vec<AdditionalColumnConfig>,
    #[serde(default = "default_true")]
    pub timestamp_utc: bool,
    #[serde(default = "default_false")]
    pub exclude_additional_properties: bool,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            use_standard_columns: default_true(),
            remove_standard_columns: Vec::new(),
            add_standard_columns: Vec::new(),
            additional_columns: Vec::new(),
            timestamp_utc: default_true(),
            exclude_additional_properties: default_false(),
        }
    }
}

impl ColumnsConfig {
    /// 构建并校验列映射
    pub fn to_mapping(&self) -> Result<ColumnMapping> {
        let mut columns = if self.use_standard_columns {
            ColumnMapping::standard_columns()
        } else {
            Vec::new()
        };
        columns.retain(|c| {
            c.standard_kind()
                .map(|kind| !self.remove_standard_columns.contains(&kind))
                .unwrap_or(true)
        });
        for kind in &self.add_standard_columns {
            if !columns.iter().any(|c| c.standard_kind() == Some(*kind)) {
                columns.push(crate::sinks::database::columns::ColumnDefinition::standard(*kind));
            }
        }
        columns.extend(
            self.additional_columns
                .iter()
                .map(AdditionalColumnConfig::to_definition),
        );

        Ok(ColumnMapping::new(columns)?
            .with_timestamp_utc(self.timestamp_utc)
            .with_exclude_additional_properties(self.exclude_additional_properties))
    }
}

/// 数据库 sink 的配置。
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DbSinkConfig {
    /// 连接字符串，或在连接注册表中查找的连接名
    pub connection_string: String,
    #[serde(default)]
    pub db_type: DatabaseType,
    #[serde(default = "default_db_pool_size")]
    pub connection_pool_size: u32,
    #[serde(default = "default_db_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_db_table_name")]
    pub table_name: String,
    /// 为空表示不使用 schema 前缀
    #[serde(default = "default_db_schema_name")]
    pub schema_name: String,
    /// 此 sink 接受的最低日志级别
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_batch_posting_limit")]
    pub batch_posting_limit: usize,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// 缓冲区软容量，超过后仍接受事件但报告溢出
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub after_shutdown: AfterShutdownPolicy,
    #[serde(default)]
    pub formatting: ValueFormatter,
    #[serde(default = "default_false")]
    pub auto_create_table: bool,
    #[serde(default)]
    pub columns: ColumnsConfig,
}

impl DbSinkConfig {
    /// 使用默认值创建配置
    pub fn new(connection_string: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            db_type: DatabaseType::default(),
            connection_pool_size: default_db_pool_size(),
            connection_timeout_ms: default_db_connection_timeout_ms(),
            table_name: table_name.into(),
            schema_name: default_db_schema_name(),
            level: default_level(),
            batch_posting_limit: default_batch_posting_limit(),
            period_ms: default_period_ms(),
            queue_limit: default_queue_limit(),
            retry: RetryConfig::default(),
            after_shutdown: AfterShutdownPolicy::default(),
            formatting: ValueFormatter::default(),
            auto_create_table: default_false(),
            columns: ColumnsConfig::default(),
        }
    }

    pub fn table(&self) -> TableName {
        TableName::new(Some(self.schema_name.as_str()), self.table_name.as_str())
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn min_level(&self) -> Result<LogLevel> {
        self.level
            .parse::<LogLevel>()
            .map_err(DbSinkError::Configuration)
    }
}

/// 从 TOML 文件加载 `DbSinkConfig`。
pub fn load_config_from_file(path: &Path) -> Result<DbSinkConfig> {
    if !path.exists() {
        return Err(DbSinkError::config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let config_str = std::fs::read_to_string(path)?;
    load_config_from_str(&config_str)
}

/// 从 TOML 字符串加载 `DbSinkConfig`。
pub fn load_config_from_str(config_str: &str) -> Result<DbSinkConfig> {
    let config: DbSinkConfig = toml::from_str(config_str)?;
    Ok(config)
}

/// 加载配置文件（可选）并叠加 `QUANTUM_DB_*` 环境变量覆盖。
pub fn load_config_layered(path: Option<&Path>) -> Result<DbSinkConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(DbSinkError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<DbSinkConfig>()?;
    Ok(config)
}

/// 验证配置的有效性。
pub fn validate_config(config: &DbSinkConfig) -> Result<()> {
    if config.connection_string.trim().is_empty() {
        return Err(DbSinkError::config("connection_string must not be empty"));
    }
    if config.table_name.trim().is_empty() {
        return Err(DbSinkError::config("table_name must not be empty"));
    }
    validate_identifier(&config.table_name, "table")?;
    if !config.schema_name.is_empty() {
        validate_identifier(&config.schema_name, "schema")?;
    }

    config.min_level()?;

    if config.batch_posting_limit == 0 {
        return Err(DbSinkError::config("batch_posting_limit must be greater than 0"));
    }
    if config.period_ms == 0 {
        return Err(DbSinkError::config("period_ms must be greater than 0"));
    }
    if config.queue_limit == 0 {
        return Err(DbSinkError::config("queue_limit must be greater than 0"));
    }
    if config.connection_pool_size == 0 {
        return Err(DbSinkError::config("connection_pool_size must be greater than 0"));
    }
    if config.retry.max_attempts == 0 {
        return Err(DbSinkError::config("retry.max_attempts must be at least 1"));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(DbSinkError::config(
            "retry.base_delay_ms must not exceed retry.max_delay_ms",
        ));
    }

    config.columns.to_mapping()?;
    Ok(())
}
