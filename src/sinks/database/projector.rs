//! 行投影
//!
//! 把一个 `LogEvent` 按列映射转换为 `Row`。投影是纯函数，没有共享状态，
//! 可以在任意生产者线程上并发调用。

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use super::columns::{ColumnDefinition, ColumnKind, ColumnMapping, SqlDataType, StandardColumn};
use super::models::{CellValue, Row};
use crate::core::event::LogEvent;
use crate::error::{DbSinkError, Result};

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S%.3f".to_string()
}

/// 将非文本值渲染为文本列内容时使用的格式
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueFormatter {
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    /// 浮点数的小数位数，`None` 表示最短精确表示
    #[serde(default)]
    pub float_precision: Option<usize>,
}

impl Default for ValueFormatter {
    fn default() -> Self {
        Self {
            timestamp_format: default_timestamp_format(),
            float_precision: None,
        }
    }
}

impl ValueFormatter {
    pub fn format_timestamp(&self, timestamp: &NaiveDateTime) -> String {
        timestamp.format(&self.timestamp_format).to_string()
    }

    pub fn format_float(&self, value: f64) -> String {
        match self.float_precision {
            Some(precision) => format!("{:.*}", precision, value),
            None => value.to_string(),
        }
    }

    fn format_json(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => match (n.is_f64(), n.as_f64()) {
                (true, Some(f)) => self.format_float(f),
                _ => n.to_string(),
            },
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// 行投影器
#[derive(Debug, Clone)]
pub struct RowProjector {
    mapping: Arc<ColumnMapping>,
    formatter: ValueFormatter,
}

impl RowProjector {
    pub fn new(mapping: ColumnMapping, formatter: ValueFormatter) -> Self {
        Self {
            mapping: Arc::new(mapping),
            formatter,
        }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn project(&self, event: &LogEvent) -> Result<Row> {
        project(event, &self.mapping, &self.formatter)
    }
}

/// 按列映射投影一个事件
///
/// 缺失的可选数据写为 NULL；只有值无法转换为列的声明类型，或非空列得到 NULL 时失败。
pub fn project(event: &LogEvent, mapping: &ColumnMapping, formatter: &ValueFormatter) -> Result<Row> {
    let timestamp = if mapping.timestamp_utc() {
        event.timestamp.naive_utc()
    } else {
        event.timestamp.with_timezone(&Local).naive_local()
    };

    let mut row = Row::with_capacity(mapping.columns().len());
    for column in mapping.writable_columns() {
        let value = match &column.kind {
            ColumnKind::Standard(standard) => {
                project_standard(*standard, column, event, mapping, formatter, timestamp)?
            }
            ColumnKind::Additional { property } => match event.properties.get(property) {
                None | Some(Value::Null) => CellValue::Null,
                Some(value) => coerce_json(value, column, formatter)?,
            },
        };

        if value.is_null() && !column.nullable {
            return Err(DbSinkError::projection(
                &column.name,
                "value is missing for a non-nullable column",
            ));
        }
        row.push(column.name.clone(), truncate(value, column.max_length));
    }
    Ok(row)
}

fn project_standard(
    standard: StandardColumn,
    column: &ColumnDefinition,
    event: &LogEvent,
    mapping: &ColumnMapping,
    formatter: &ValueFormatter,
    timestamp: NaiveDateTime,
) -> Result<CellValue> {
    let value = match standard {
        StandardColumn::Id => CellValue::Null,
        StandardColumn::TimeStamp => match column.data_type {
            SqlDataType::Text => CellValue::Text(formatter.format_timestamp(&timestamp)),
            _ => CellValue::Timestamp(timestamp),
        },
        StandardColumn::Level => {
            if column.data_type.is_integer() {
                CellValue::Integer(event.level.ordinal())
            } else {
                CellValue::Text(event.level.as_str().to_string())
            }
        }
        StandardColumn::Message => CellValue::Text(event.message.clone()),
        StandardColumn::MessageTemplate => CellValue::Text(event.message_template.clone()),
        StandardColumn::Exception => optional_text(&event.exception),
        StandardColumn::Properties => {
            let excluded = if mapping.exclude_additional_properties() {
                mapping.additional_properties()
            } else {
                Default::default()
            };
            let properties: serde_json::Map<String, Value> = event
                .properties
                .iter()
                .filter(|(name, _)| !excluded.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            if properties.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(Value::Object(properties).to_string())
            }
        }
        StandardColumn::LogEvent => CellValue::Text(event.to_json()?),
        StandardColumn::TraceId => optional_text(&event.trace_id),
        StandardColumn::SpanId => optional_text(&event.span_id),
    };
    Ok(value)
}

fn optional_text(value: &Option<String>) -> CellValue {
    value
        .as_ref()
        .map(|s| CellValue::Text(s.clone()))
        .unwrap_or(CellValue::Null)
}

fn truncate(value: CellValue, max_length: Option<u32>) -> CellValue {
    match (value, max_length) {
        (CellValue::Text(s), Some(max)) if s.chars().count() > max as usize => {
            CellValue::Text(s.chars().take(max as usize).collect())
        }
        (value, _) => value,
    }
}

/// 将属性值转换为列的声明类型
fn coerce_json(value: &Value, column: &ColumnDefinition, formatter: &ValueFormatter) -> Result<CellValue> {
    let incompatible = || {
        DbSinkError::projection(
            &column.name,
            format!("cannot convert {} to {:?}", value, column.data_type),
        )
    };

    let cell = match column.data_type {
        SqlDataType::Text => CellValue::Text(formatter.format_json(value)),
        SqlDataType::Integer | SqlDataType::BigInt => {
            let n = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                            .map(|f| f as i64)
                    })
                    .ok_or_else(incompatible)?,
                Value::String(s) => s.trim().parse::<i64>().map_err(|_| incompatible())?,
                _ => return Err(incompatible()),
            };
            if column.data_type == SqlDataType::Integer && i32::try_from(n).is_err() {
                return Err(DbSinkError::projection(
                    &column.name,
                    format!("{} is out of range for a 32-bit integer column", n),
                ));
            }
            CellValue::Integer(n)
        }
        SqlDataType::Float => match value {
            Value::Number(n) => CellValue::Float(n.as_f64().ok_or_else(incompatible)?),
            Value::String(s) => CellValue::Float(s.trim().parse::<f64>().map_err(|_| incompatible())?),
            _ => return Err(incompatible()),
        },
        SqlDataType::Boolean => match value {
            Value::Bool(b) => CellValue::Boolean(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => CellValue::Boolean(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => CellValue::Boolean(false),
            Value::Number(n) if n.as_i64() == Some(0) => CellValue::Boolean(false),
            Value::Number(n) if n.as_i64() == Some(1) => CellValue::Boolean(true),
            _ => return Err(incompatible()),
        },
        SqlDataType::Timestamp => match value {
            Value::String(s) => {
                let parsed = DateTime::parse_from_rfc3339(s.trim()).map_err(|_| incompatible())?;
                CellValue::Timestamp(parsed.with_timezone(&Utc).naive_utc())
            }
            _ => return Err(incompatible()),
        },
    };
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::LogLevel;
    use chrono::TimeZone;
    use serde_json::json;

    fn event() -> LogEvent {
        LogEvent::new(LogLevel::Warn, "disk 91% full")
            .with_template("disk {usage}% full")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
    }

    fn projector(columns: Vec<ColumnDefinition>) -> RowProjector {
        RowProjector::new(ColumnMapping::new(columns).unwrap(), ValueFormatter::default())
    }

    #[test]
    fn test_standard_columns_without_properties() {
        let projector = RowProjector::new(ColumnMapping::standard(), ValueFormatter::default());
        let row = projector.project(&event()).unwrap();

        let names: Vec<&str> = row.column_names().collect();
        assert_eq!(
            names,
            vec!["Message", "MessageTemplate", "Level", "TimeStamp", "Exception", "Properties"]
        );
        assert_eq!(row.get("Message"), Some(&CellValue::Text("disk 91% full".into())));
        assert_eq!(row.get("MessageTemplate"), Some(&CellValue::Text("disk {usage}% full".into())));
        assert_eq!(row.get("Level"), Some(&CellValue::Text("WARN".into())));
        assert_eq!(
            row.get("TimeStamp"),
            Some(&CellValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap().naive_utc()
            ))
        );
        assert_eq!(row.get("Exception"), Some(&CellValue::Null));
        assert_eq!(row.get("Properties"), Some(&CellValue::Null));
    }

    #[test]
    fn test_additional_columns_lookup_and_null_default() {
        let projector = projector(vec![
            ColumnDefinition::standard(StandardColumn::Message),
            ColumnDefinition::additional("UserName", SqlDataType::Text).with_property("user"),
            ColumnDefinition::additional("Attempts", SqlDataType::Integer),
            ColumnDefinition::additional("Region", SqlDataType::Text),
        ]);

        let event = event().with_property("user", "alice").with_property("Attempts", "3");
        let row = projector.project(&event).unwrap();

        assert_eq!(row.get("UserName"), Some(&CellValue::Text("alice".into())));
        assert_eq!(row.get("Attempts"), Some(&CellValue::Integer(3)));
        assert_eq!(row.get("Region"), Some(&CellValue::Null));
    }

    #[test]
    fn test_type_incompatible_value_fails() {
        let projector = projector(vec![ColumnDefinition::additional("Attempts", SqlDataType::Integer)]);

        let err = projector
            .project(&event().with_property("Attempts", "many"))
            .unwrap_err();
        assert!(matches!(err, DbSinkError::Projection { ref column, .. } if column == "Attempts"));

        let err = projector
            .project(&event().with_property("Attempts", json!({"n": 1})))
            .unwrap_err();
        assert_eq!(err.category(), "projection");
    }

    #[test]
    fn test_integer_range_and_float_coercion() {
        let projector = projector(vec![
            ColumnDefinition::additional("Small", SqlDataType::Integer),
            ColumnDefinition::additional("Big", SqlDataType::BigInt),
            ColumnDefinition::additional("Ratio", SqlDataType::Float),
        ]);

        let row = projector
            .project(
                &event()
                    .with_property("Small", 4.0)
                    .with_property("Big", 5_000_000_000i64)
                    .with_property("Ratio", "0.25"),
            )
            .unwrap();
        assert_eq!(row.get("Small"), Some(&CellValue::Integer(4)));
        assert_eq!(row.get("Big"), Some(&CellValue::Integer(5_000_000_000)));
        assert_eq!(row.get("Ratio"), Some(&CellValue::Float(0.25)));

        assert!(projector
            .project(&event().with_property("Small", 5_000_000_000i64))
            .is_err());
    }

    #[test]
    fn test_boolean_and_timestamp_coercion() {
        let projector = projector(vec![
            ColumnDefinition::additional("Cached", SqlDataType::Boolean),
            ColumnDefinition::additional("SeenAt", SqlDataType::Timestamp),
        ]);

        let row = projector
            .project(
                &event()
                    .with_property("Cached", "TRUE")
                    .with_property("SeenAt", "2024-05-01T14:30:00+02:00"),
            )
            .unwrap();
        assert_eq!(row.get("Cached"), Some(&CellValue::Boolean(true)));
        assert_eq!(
            row.get("SeenAt"),
            Some(&CellValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap().naive_utc()
            ))
        );

        assert!(projector.project(&event().with_property("Cached", 2)).is_err());
        assert!(projector.project(&event().with_property("SeenAt", 17)).is_err());
    }

    #[test]
    fn test_text_rendering_and_truncation() {
        let projector = RowProjector::new(
            ColumnMapping::new(vec![
                ColumnDefinition::standard(StandardColumn::Message).with_max_length(Some(4)),
                ColumnDefinition::additional("Ratio", SqlDataType::Text),
                ColumnDefinition::additional("Tags", SqlDataType::Text),
                ColumnDefinition::standard(StandardColumn::TimeStamp).with_data_type(SqlDataType::Text),
            ])
            .unwrap(),
            ValueFormatter {
                timestamp_format: "%Y-%m-%d".into(),
                float_precision: Some(2),
            },
        );

        let row = projector
            .project(&event().with_property("Ratio", 0.5).with_property("Tags", json!(["a", "b"])))
            .unwrap();
        assert_eq!(row.get("Message"), Some(&CellValue::Text("disk".into())));
        assert_eq!(row.get("Ratio"), Some(&CellValue::Text("0.50".into())));
        assert_eq!(row.get("Tags"), Some(&CellValue::Text("[\"a\",\"b\"]".into())));
        assert_eq!(row.get("TimeStamp"), Some(&CellValue::Text("2024-05-01".into())));
    }

    #[test]
    fn test_properties_blob_and_exclusion() {
        let columns = vec![
            ColumnDefinition::standard(StandardColumn::Properties),
            ColumnDefinition::additional("UserName", SqlDataType::Text).with_property("user"),
        ];
        let event = event().with_property("user", "bob").with_property("ip", "10.0.0.1");

        let row = projector(columns.clone()).project(&event).unwrap();
        let blob: Value = serde_json::from_str(row.get("Properties").unwrap().as_text().unwrap()).unwrap();
        assert_eq!(blob, json!({"ip": "10.0.0.1", "user": "bob"}));

        let excluding = RowProjector::new(
            ColumnMapping::new(columns).unwrap().with_exclude_additional_properties(true),
            ValueFormatter::default(),
        );
        let row = excluding.project(&event).unwrap();
        let blob: Value = serde_json::from_str(row.get("Properties").unwrap().as_text().unwrap()).unwrap();
        assert_eq!(blob, json!({"ip": "10.0.0.1"}));
    }

    #[test]
    fn test_level_as_integer_and_exception() {
        let projector = projector(vec![
            ColumnDefinition::standard(StandardColumn::Level).with_data_type(SqlDataType::Integer),
            ColumnDefinition::standard(StandardColumn::Exception),
            ColumnDefinition::standard(StandardColumn::TraceId),
        ]);

        let row = projector
            .project(&event().with_exception("io error: broken pipe"))
            .unwrap();
        assert_eq!(row.get("Level"), Some(&CellValue::Integer(3)));
        assert_eq!(row.get("Exception"), Some(&CellValue::Text("io error: broken pipe".into())));
        assert_eq!(row.get("TraceId"), Some(&CellValue::Null));
    }

    #[test]
    fn test_non_nullable_missing_value_fails() {
        let projector = projector(vec![
            ColumnDefinition::standard(StandardColumn::Message),
            ColumnDefinition::additional("Tenant", SqlDataType::Text).with_nullable(false),
        ]);
        let err = projector.project(&event()).unwrap_err();
        assert!(matches!(err, DbSinkError::Projection { ref column, .. } if column == "Tenant"));
        assert!(projector
            .project(&event().with_property("Tenant", serde_json::Value::Null))
            .is_err());
        assert!(projector.project(&event().with_property("Tenant", "acme")).is_ok());
    }
}
