//! 连接字符串解析
//!
//! 配置中的 `connection_string` 可以是字面的连接字符串，也可以是一个连接名。
//! 连接名通过显式传入的 [`ConnectionRegistry`] 解析；找不到时按字面值使用，
//! 并通过诊断通道报告。

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;

use crate::diagnostics::{DiagnosticEvent, Diagnostics};

/// 环境变量注册表的默认前缀
pub const DEFAULT_CONNECTION_ENV_PREFIX: &str = "QUANTUM_CONNECTION_";

/// 命名连接注册表
pub trait ConnectionRegistry: Send + Sync + Debug {
    /// 查找连接名对应的连接字符串
    fn lookup(&self, name: &str) -> Option<String>;
}

/// 内存中的命名连接表
#[derive(Debug, Clone, Default)]
pub struct NamedConnections {
    connections: HashMap<String, String>,
}

impl NamedConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        self.insert(name, connection_string);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, connection_string: impl Into<String>) {
        self.connections.insert(name.into(), connection_string.into());
    }
}

impl ConnectionRegistry for NamedConnections {
    fn lookup(&self, name: &str) -> Option<String> {
        self.connections.get(name).cloned().or_else(|| {
            self.connections
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }
}

/// 从环境变量读取命名连接，例如 `QUANTUM_CONNECTION_LOGDB`
#[derive(Debug, Clone)]
pub struct EnvConnectionRegistry {
    prefix: String,
}

impl Default for EnvConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_ENV_PREFIX)
    }
}

impl EnvConnectionRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ConnectionRegistry for EnvConnectionRegistry {
    fn lookup(&self, name: &str) -> Option<String> {
        env::var(format!("{}{}", self.prefix, name.to_ascii_uppercase()))
            .ok()
            .filter(|s| !s.is_empty())
    }
}

/// 值是否像一个连接名而不是连接字符串
pub fn looks_like_name(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| matches!(c, '=' | ':' | '/' | '\\' | '.' | ';') || c.is_whitespace())
}

/// 解析连接字符串
///
/// 只对看起来像连接名的值进行查找；找不到时报告 `ConnectionStringNotFound`
/// 并按字面值返回。
pub fn resolve_connection_string(
    value: &str,
    registry: Option<&dyn ConnectionRegistry>,
    diagnostics: &Diagnostics,
) -> String {
    let value = value.trim();
    let registry = match registry {
        Some(registry) if looks_like_name(value) => registry,
        _ => return value.to_string(),
    };

    match registry.lookup(value) {
        Some(resolved) => resolved,
        None => {
            diagnostics.report(DiagnosticEvent::ConnectionStringNotFound {
                name: value.to_string(),
            });
            value.to_string()
        }
    }
}
