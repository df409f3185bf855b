//! 列映射定义
//!
//! `ColumnMapping` 描述日志事件的各个字段如何映射到目标表的列。映射在构造时校验，
//! 之后不可变；合并外部列定义通过纯函数 [`merge_additional_columns`] 完成。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{DbSinkError, Result};

/// 标识符最大长度
const MAX_IDENTIFIER_LEN: usize = 128;

/// 列的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDataType {
    Text,
    /// 32 位整数
    Integer,
    /// 64 位整数
    BigInt,
    Float,
    Boolean,
    Timestamp,
}

impl SqlDataType {
    pub fn is_integer(&self) -> bool {
        matches!(self, SqlDataType::Integer | SqlDataType::BigInt)
    }
}

/// 标准列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardColumn {
    /// 自增主键，不参与投影
    Id,
    TimeStamp,
    Level,
    Message,
    MessageTemplate,
    Exception,
    /// 事件属性的 JSON 文本
    Properties,
    /// 整个事件的 JSON 文本
    LogEvent,
    TraceId,
    SpanId,
}

impl StandardColumn {
    /// 标准列的默认列名
    pub fn default_name(&self) -> &'static str {
        match self {
            StandardColumn::Id => "Id",
            StandardColumn::TimeStamp => "TimeStamp",
            StandardColumn::Level => "Level",
            StandardColumn::Message => "Message",
            StandardColumn::MessageTemplate => "MessageTemplate",
            StandardColumn::Exception => "Exception",
            StandardColumn::Properties => "Properties",
            StandardColumn::LogEvent => "LogEvent",
            StandardColumn::TraceId => "TraceId",
            StandardColumn::SpanId => "SpanId",
        }
    }

    fn default_data_type(&self) -> SqlDataType {
        match self {
            StandardColumn::Id => SqlDataType::BigInt,
            StandardColumn::TimeStamp => SqlDataType::Timestamp,
            _ => SqlDataType::Text,
        }
    }

    fn default_max_length(&self) -> Option<u32> {
        match self {
            StandardColumn::Level => Some(16),
            StandardColumn::TraceId | StandardColumn::SpanId => Some(64),
            _ => None,
        }
    }

    fn accepts(&self, data_type: SqlDataType) -> bool {
        match self {
            StandardColumn::Id => data_type.is_integer(),
            StandardColumn::TimeStamp => {
                matches!(data_type, SqlDataType::Timestamp | SqlDataType::Text)
            }
            StandardColumn::Level => data_type == SqlDataType::Text || data_type.is_integer(),
            _ => data_type == SqlDataType::Text,
        }
    }
}

/// 列的语义类别
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Standard(StandardColumn),
    /// 绑定到事件指定属性的附加列
    Additional { property: String },
}

/// 单个列定义
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnKind,
    pub data_type: SqlDataType,
    pub nullable: bool,
    /// 文本列的最大长度，超出部分在投影时截断
    pub max_length: Option<u32>,
}

impl ColumnDefinition {
    /// 使用默认名称和类型创建标准列
    pub fn standard(column: StandardColumn) -> Self {
        Self {
            name: column.default_name().to_string(),
            kind: ColumnKind::Standard(column),
            data_type: column.default_data_type(),
            nullable: !matches!(column, StandardColumn::Id | StandardColumn::TimeStamp),
            max_length: column.default_max_length(),
        }
    }

    /// 创建附加列，默认绑定到与列同名的属性
    pub fn additional(name: impl Into<String>, data_type: SqlDataType) -> Self {
        let name = name.into();
        Self {
            kind: ColumnKind::Additional {
                property: name.clone(),
            },
            name,
            data_type,
            nullable: true,
            max_length: None,
        }
    }

    /// 修改列名
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 绑定到指定属性（仅对附加列有效）
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        if let ColumnKind::Additional { .. } = self.kind {
            self.kind = ColumnKind::Additional {
                property: property.into(),
            };
        }
        self
    }

    pub fn with_data_type(mut self, data_type: SqlDataType) -> Self {
        self.data_type = data_type;
        if data_type != SqlDataType::Text {
            self.max_length = None;
        }
        self
    }

    /// 设置列是否允许 NULL
    ///
    /// 附加列设为不可空后，缺少对应属性（或属性为 null）的事件会在投影时失败：
    /// 批量 sink 丢弃该事件并报告 `EventDropped`，审计 sink 向调用方返回投影错误。
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_max_length(mut self, max_length: Option<u32>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn standard_kind(&self) -> Option<StandardColumn> {
        match self.kind {
            ColumnKind::Standard(column) => Some(column),
            ColumnKind::Additional { .. } => None,
        }
    }

    /// 是否由数据库生成（不出现在 INSERT 中）
    pub fn is_generated(&self) -> bool {
        self.kind == ColumnKind::Standard(StandardColumn::Id)
    }

    fn validate(&self) -> Result<()> {
        validate_identifier(&self.name, "column")?;

        if let Some(0) = self.max_length {
            return Err(DbSinkError::config(format!(
                "column '{}' has a max_length of 0",
                self.name
            )));
        }
        if self.max_length.is_some() && self.data_type != SqlDataType::Text {
            return Err(DbSinkError::config(format!(
                "column '{}' sets max_length on a non-text type {:?}",
                self.name, self.data_type
            )));
        }

        match &self.kind {
            ColumnKind::Standard(column) => {
                if !column.accepts(self.data_type) {
                    return Err(DbSinkError::config(format!(
                        "column '{}' ({:?}) cannot be stored as {:?}",
                        self.name, column, self.data_type
                    )));
                }
                if *column == StandardColumn::Id && self.nullable {
                    return Err(DbSinkError::config(format!(
                        "identity column '{}' cannot be nullable",
                        self.name
                    )));
                }
            }
            ColumnKind::Additional { property } => {
                if property.trim().is_empty() {
                    return Err(DbSinkError::config(format!(
                        "additional column '{}' is not bound to a property",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// 经过校验的有序列映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: Vec<ColumnDefinition>,
    timestamp_utc: bool,
    exclude_additional_properties: bool,
}

impl ColumnMapping {
    /// 校验并创建列映射
    ///
    /// 列名（不区分大小写）必须唯一，每种标准列最多出现一次。
    pub fn new(columns: Vec<ColumnDefinition>) -> Result<Self> {
        let mapping = Self {
            columns,
            timestamp_utc: true,
            exclude_additional_properties: false,
        };
        mapping.validate()?;
        Ok(mapping)
    }

    /// 默认的标准列集合
    pub fn standard() -> Self {
        Self {
            columns: Self::standard_columns(),
            timestamp_utc: true,
            exclude_additional_properties: false,
        }
    }

    /// 默认启用的标准列定义
    pub fn standard_columns() -> Vec<ColumnDefinition> {
        [
            StandardColumn::Id,
            StandardColumn::Message,
            StandardColumn::MessageTemplate,
            StandardColumn::Level,
            StandardColumn::TimeStamp,
            StandardColumn::Exception,
            StandardColumn::Properties,
        ]
        .into_iter()
        .map(ColumnDefinition::standard)
        .collect()
    }

    /// 时间戳是否以 UTC 存储（否则转换为本地时间）
    pub fn with_timestamp_utc(mut self, utc: bool) -> Self {
        self.timestamp_utc = utc;
        self
    }

    /// 属性 JSON 中是否排除已映射到附加列的属性
    pub fn with_exclude_additional_properties(mut self, exclude: bool) -> Self {
        self.exclude_additional_properties = exclude;
        self
    }

    pub fn timestamp_utc(&self) -> bool {
        self.timestamp_utc
    }

    pub fn exclude_additional_properties(&self) -> bool {
        self.exclude_additional_properties
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// 需要由投影器填充的列（排除自增主键）
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| !c.is_generated())
    }

    pub fn find(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn standard_column(&self, column: StandardColumn) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.kind == ColumnKind::Standard(column))
    }

    /// 被附加列绑定的属性名称
    pub fn additional_properties(&self) -> HashSet<&str> {
        self.columns
            .iter()
            .filter_map(|c| match &c.kind {
                ColumnKind::Additional { property } => Some(property.as_str()),
                ColumnKind::Standard(_) => None,
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut standard = HashSet::new();

        for column in &self.columns {
            column.validate()?;

            if !names.insert(column.name.to_ascii_lowercase()) {
                return Err(DbSinkError::config(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
            if let Some(kind) = column.standard_kind() {
                if !standard.insert(kind) {
                    return Err(DbSinkError::config(format!(
                        "standard column {:?} is mapped more than once",
                        kind
                    )));
                }
            }
        }

        if self.writable_columns().next().is_none() {
            return Err(DbSinkError::config(
                "column mapping has no writable columns",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ColumnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// 将外部定义的附加列合并进映射
///
/// 纯函数：不修改 `base`。`extra` 中名称尚未出现在 `base` 的列按顺序追加，
/// 同名列保留 `base` 的定义。结果重新校验。
pub fn merge_additional_columns(
    base: &ColumnMapping,
    extra: &[ColumnDefinition],
) -> Result<ColumnMapping> {
    let mut columns = base.columns.clone();
    for column in extra {
        let exists = columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&column.name));
        if !exists {
            columns.push(column.clone());
        }
    }

    let merged = ColumnMapping {
        columns,
        timestamp_utc: base.timestamp_utc,
        exclude_additional_properties: base.exclude_additional_properties,
    };
    merged.validate()?;
    Ok(merged)
}

/// 检查名称是否为合法的 SQL 标识符
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 校验标识符，失败时返回配置错误
pub fn validate_identifier(name: &str, what: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DbSinkError::config(format!(
            "invalid {} name '{}': expected [A-Za-z_][A-Za-z0-9_]*",
            what, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_mapping_is_valid() {
        let mapping = ColumnMapping::standard();
        assert!(mapping.validate().is_ok());
        assert_eq!(mapping.columns().len(), 7);
        assert_eq!(mapping.writable_columns().count(), 6);
        assert!(mapping.standard_column(StandardColumn::Id).is_some());
        assert!(mapping.standard_column(StandardColumn::LogEvent).is_none());
    }

    #[test]
    fn test_duplicate_names_rejected_case_insensitive() {
        let mut columns = ColumnMapping::standard_columns();
        columns.push(ColumnDefinition::additional("message", SqlDataType::Text));

        let err = ColumnMapping::new(columns).unwrap_err();
        assert!(matches!(err, DbSinkError::Configuration(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_duplicate_additional_columns_rejected() {
        let columns = vec![
            ColumnDefinition::standard(StandardColumn::Message),
            ColumnDefinition::additional("UserName", SqlDataType::Text),
            ColumnDefinition::additional("UserName", SqlDataType::Text).with_property("user"),
        ];
        assert!(ColumnMapping::new(columns).is_err());
    }

    #[test]
    fn test_duplicate_standard_kind_rejected() {
        let columns = vec![
            ColumnDefinition::standard(StandardColumn::Message),
            ColumnDefinition::standard(StandardColumn::Message).named("Msg2"),
        ];
        let err = ColumnMapping::new(columns).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_invalid_identifiers_and_types() {
        let bad_name = vec![ColumnDefinition::additional("drop table;", SqlDataType::Text)];
        assert!(ColumnMapping::new(bad_name).is_err());

        let bad_type = vec![
            ColumnDefinition::standard(StandardColumn::TimeStamp).with_data_type(SqlDataType::Boolean),
        ];
        assert!(ColumnMapping::new(bad_type).is_err());

        let nullable_id = vec![
            ColumnDefinition::standard(StandardColumn::Id).with_nullable(true),
            ColumnDefinition::standard(StandardColumn::Message),
        ];
        assert!(ColumnMapping::new(nullable_id).is_err());

        let only_id = vec![ColumnDefinition::standard(StandardColumn::Id)];
        assert!(ColumnMapping::new(only_id).is_err());
    }

    #[test]
    fn test_level_as_integer_is_allowed() {
        let columns = vec![
            ColumnDefinition::standard(StandardColumn::Level).with_data_type(SqlDataType::Integer),
        ];
        let mapping = ColumnMapping::new(columns).unwrap();
        let level = mapping.standard_column(StandardColumn::Level).unwrap();
        assert_eq!(level.data_type, SqlDataType::Integer);
        assert_eq!(level.max_length, None);
    }

    #[test]
    fn test_merge_appends_only_missing_columns() {
        let base = ColumnMapping::new(vec![
            ColumnDefinition::standard(StandardColumn::Message),
            ColumnDefinition::additional("UserName", SqlDataType::Text).with_max_length(Some(32)),
        ])
        .unwrap();

        let extra = vec![
            ColumnDefinition::additional("username", SqlDataType::Text),
            ColumnDefinition::additional("Duration", SqlDataType::Float),
        ];

        let merged = merge_additional_columns(&base, &extra).unwrap();
        let names: Vec<&str> = merged.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Message", "UserName", "Duration"]);
        assert_eq!(merged.find("USERNAME").unwrap().max_length, Some(32));

        // base 保持不变
        assert_eq!(base.columns().len(), 2);
    }

    #[test]
    fn test_merge_revalidates() {
        let base = ColumnMapping::standard();
        let extra = vec![ColumnDefinition::additional("bad-name", SqlDataType::Text)];
        assert!(merge_additional_columns(&base, &extra).is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("Logs"));
        assert!(is_valid_identifier("_log_2024"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1logs"));
        assert!(!is_valid_identifier("logs\"; --"));
        assert!(!is_valid_identifier(&"a".repeat(129)));
    }
}
