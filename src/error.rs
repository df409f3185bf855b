//! Error types for quantum_log_db
//!
//! This module defines the error taxonomy shared by the batching and audit sinks.
//! Construction-time errors (`Configuration`, `Schema`) abort sink creation, steady-state
//! errors of the batching sink are absorbed and reported through the diagnostics channel,
//! and the audit sink propagates every error to its caller.

use thiserror::Error;

/// Main error type for quantum_log_db operations
#[derive(Error, Debug)]
pub enum DbSinkError {
    /// Invalid or contradictory setup, fatal at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 自动建表的 DDL 被存储拒绝，构造时致命
    #[error("Schema error: {0}")]
    Schema(String),

    /// 事件无法转换为目标列类型，仅丢弃该事件
    #[error("Projection error on column '{column}': {message}")]
    Projection { column: String, message: String },

    /// 可重试的存储错误（连接丢失、超时、死锁）
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// 不可重试的存储错误（类型不匹配、约束冲突）
    #[error("Structural store error: {0}")]
    StructuralStore(String),

    /// Sink 已关闭，不再接受事件
    #[error("Sink is closed")]
    SinkClosed,

    /// Cargo feature required for the requested backend is not enabled
    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(String),

    /// 停机等待超时
    #[error("Shutdown timeout")]
    ShutdownTimeout,

    /// Background task errors
    #[error("Background task error: {0}")]
    BackgroundTask(String),

    /// I/O errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// TOML parsing errors
    #[error("TOML parsing error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    /// Layered configuration source errors
    #[error("Configuration source error: {source}")]
    ConfigSource {
        #[from]
        source: config::ConfigError,
    },
}

/// Result type alias for quantum_log_db operations
pub type Result<T> = std::result::Result<T, DbSinkError>;

impl DbSinkError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new schema error
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new projection error for the given column
    pub fn projection<C: Into<String>, S: Into<String>>(column: C, msg: S) -> Self {
        Self::Projection {
            column: column.into(),
            message: msg.into(),
        }
    }

    /// Create a new background task error
    pub fn background_task<S: Into<String>>(msg: S) -> Self {
        Self::BackgroundTask(msg.into())
    }

    /// Check if this error is recoverable by retrying the same operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::Io { .. })
    }

    /// Get the error category for logging purposes
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::Toml { .. } | Self::ConfigSource { .. } => "config",
            Self::Schema(_) => "schema",
            Self::Projection { .. } => "projection",
            Self::TransientStore(_) | Self::StructuralStore(_) => "store",
            Self::SinkClosed | Self::ShutdownTimeout => "shutdown",
            Self::FeatureNotEnabled(_) => "feature",
            Self::BackgroundTask(_) => "background_task",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// 存储错误的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// 连接丢失、超时、锁竞争等，可以用同一批次重试
    Transient,
    /// 类型不匹配、约束冲突等映射或表结构缺陷，不应重试
    Structural,
}

/// 存储边界上的错误
///
/// 所有 `LogStore` 实现都返回此类型，由写入器根据 `kind` 决定是否重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} store failure: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: msg.into(),
        }
    }

    pub fn structural<S: Into<String>>(msg: S) -> Self {
        Self {
            kind: StoreErrorKind::Structural,
            message: msg.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

impl From<StoreError> for DbSinkError {
    fn from(err: StoreError) -> Self {
        match err.kind {
            StoreErrorKind::Transient => Self::TransientStore(err.message),
            StoreErrorKind::Structural => Self::StructuralStore(err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_creation() {
        let config_err = DbSinkError::config("Invalid configuration");
        assert!(matches!(config_err, DbSinkError::Configuration(_)));
        assert_eq!(
            config_err.to_string(),
            "Configuration error: Invalid configuration"
        );

        let proj_err = DbSinkError::projection("Duration", "not a number");
        assert_eq!(
            proj_err.to_string(),
            "Projection error on column 'Duration': not a number"
        );
    }

    #[test]
    fn test_error_from_conversions() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let err: DbSinkError = io_error.into();
        assert!(matches!(err, DbSinkError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json").unwrap_err();
        let err: DbSinkError = json_error.into();
        assert!(matches!(err, DbSinkError::Serialization { .. }));
    }

    #[test]
    fn test_store_error_conversion_keeps_kind() {
        let err: DbSinkError = StoreError::transient("connection reset").into();
        assert!(matches!(err, DbSinkError::TransientStore(ref m) if m == "connection reset"));
        assert!(err.is_recoverable());

        let err: DbSinkError = StoreError::structural("NOT NULL constraint failed").into();
        assert!(matches!(err, DbSinkError::StructuralStore(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(DbSinkError::config("test").category(), "config");
        assert_eq!(DbSinkError::schema("test").category(), "schema");
        assert_eq!(DbSinkError::projection("c", "m").category(), "projection");
        assert_eq!(DbSinkError::TransientStore("x".into()).category(), "store");
        assert_eq!(DbSinkError::SinkClosed.category(), "shutdown");
        assert_eq!(DbSinkError::background_task("x").category(), "background_task");
    }

    #[test]
    fn test_unicode_error_message() {
        let unicode_msg = "配置错误: 无效的参数 🚫";
        let err = DbSinkError::config(unicode_msg);
        assert!(err.to_string().contains(unicode_msg));
    }
}
