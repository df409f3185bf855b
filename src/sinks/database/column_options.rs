//! 外部声明的附加列
//!
//! 附加列可以写在独立的 TOML 文件中，与代码里的列映射分开维护：
//!
//! ```toml
//! [[additional_columns]]
//! name = "UserName"
//! property = "user"
//! data_type = "text"
//! max_length = 64
//!
//! [[additional_columns]]
//! name = "Elapsed"
//! data_type = "float"
//! ```
//!
//! 加载结果通过 [`merge_additional_columns`](super::columns::merge_additional_columns)
//! 合并进映射。

use serde::Deserialize;
use std::path::Path;

use super::columns::{ColumnDefinition, SqlDataType};
use crate::error::{DbSinkError, Result};

fn default_data_type() -> SqlDataType {
    SqlDataType::Text
}
fn default_true() -> bool {
    true
}

/// 单个附加列的声明
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AdditionalColumnConfig {
    pub name: String,
    /// 绑定的事件属性，缺省为列名
    pub property: Option<String>,
    #[serde(default = "default_data_type")]
    pub data_type: SqlDataType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    pub max_length: Option<u32>,
}

impl AdditionalColumnConfig {
    pub fn to_definition(&self) -> ColumnDefinition {
        let property = self.property.clone().unwrap_or_else(|| self.name.clone());
        ColumnDefinition::additional(self.name.clone(), self.data_type)
            .with_property(property)
            .with_nullable(self.nullable)
            .with_max_length(self.max_length)
    }
}

/// 外部列配置源
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnOptions {
    #[serde(default)]
    pub additional_columns: Vec<AdditionalColumnConfig>,
}

impl ColumnOptions {
    /// 从 TOML 字符串加载
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<ColumnOptions>()?;
        Ok(options)
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DbSinkError::config(format!(
                "column options file not found: {}",
                path.display()
            )));
        }

        let options = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize::<ColumnOptions>()?;
        Ok(options)
    }

    /// 转换为列定义，顺序与声明一致
    pub fn definitions(&self) -> Vec<ColumnDefinition> {
        self.additional_columns
            .iter()
            .map(AdditionalColumnConfig::to_definition)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::database::columns::{merge_additional_columns, ColumnKind, ColumnMapping};
    use std::io::Write;

    const OPTIONS: &str = r#"
        [[additional_columns]]
        name = "UserName"
        property = "user"
        max_length = 64

        [[additional_columns]]
        name = "Elapsed"
        data_type = "float"
        nullable = false
    "#;

    #[test]
    fn test_load_from_str() {
        let options = ColumnOptions::from_toml_str(OPTIONS).unwrap();
        assert_eq!(options.additional_columns.len(), 2);

        let defs = options.definitions();
        assert_eq!(defs[0].name, "UserName");
        assert_eq!(
            defs[0].kind,
            ColumnKind::Additional {
                property: "user".to_string()
            }
        );
        assert_eq!(defs[0].max_length, Some(64));
        assert_eq!(defs[1].data_type, SqlDataType::Float);
        assert!(!defs[1].nullable);
        assert_eq!(
            defs[1].kind,
            ColumnKind::Additional {
                property: "Elapsed".to_string()
            }
        );
    }

    #[test]
    fn test_empty_source_has_no_columns() {
        let options = ColumnOptions::from_toml_str("").unwrap();
        assert!(options.additional_columns.is_empty());
    }

    #[test]
    fn test_load_from_file_and_merge() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(OPTIONS.as_bytes()).unwrap();

        let options = ColumnOptions::from_file(file.path()).unwrap();
        let merged = merge_additional_columns(&ColumnMapping::standard(), &options.definitions()).unwrap();
        assert!(merged.find("UserName").is_some());
        assert!(merged.find("Elapsed").is_some());
        assert_eq!(merged.columns().len(), 9);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = ColumnOptions::from_file(Path::new("/nonexistent/columns.toml")).unwrap_err();
        assert!(matches!(err, DbSinkError::Configuration(_)));
    }
}
