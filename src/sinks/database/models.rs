//! 行与批次模型
//!
//! `Row` 是一个事件经过列映射投影后的结果；`Batch` 是一个刷新周期内收集的行，
//! 交给写入器后不再修改。

use chrono::{DateTime, NaiveDateTime, Utc};

/// 单元格的值
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// 按列顺序排列的 (列名, 值) 序列
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: CellValue) {
        self.cells.push((column.into(), value));
    }

    /// 按列名（不区分大小写）查找值
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &CellValue> {
        self.cells.iter().map(|(_, value)| value)
    }

    pub fn cells(&self) -> &[(String, CellValue)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// 一个刷新周期内收集的行
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    rows: Vec<Row>,
    /// 批次从缓冲区取出的时间
    pub collected_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            collected_at: Utc::now(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按最大行数切分为多个批次，保持顺序
    pub fn split(self, max_rows: usize) -> Vec<Batch> {
        let max_rows = max_rows.max(1);
        let collected_at = self.collected_at;
        let mut batches = Vec::with_capacity(self.rows.len().div_ceil(max_rows));
        let mut rows = self.rows.into_iter().peekable();

        while rows.peek().is_some() {
            let chunk: Vec<Row> = rows.by_ref().take(max_rows).collect();
            batches.push(Batch {
                rows: chunk,
                collected_at,
            });
        }
        batches
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: i64) -> Row {
        let mut row = Row::new();
        row.push("N", CellValue::Integer(n));
        row
    }

    #[test]
    fn test_row_lookup() {
        let mut row = Row::with_capacity(2);
        row.push("Message", CellValue::Text("hello".into()));
        row.push("Exception", CellValue::Null);

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("message").and_then(CellValue::as_text), Some("hello"));
        assert!(row.get("Exception").unwrap().is_null());
        assert!(row.get("Missing").is_none());
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["Message", "Exception"]);
    }

    #[test]
    fn test_batch_split_keeps_order() {
        let batch = Batch::new((0..7).map(row).collect());
        let parts = batch.split(3);

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(parts[2].len(), 1);
        let flattened: Vec<&CellValue> = parts
            .iter()
            .flat_map(|b| b.rows().iter().flat_map(|r| r.values()))
            .collect();
        assert_eq!(flattened[6], &CellValue::Integer(6));
    }

    #[test]
    fn test_empty_batch_split() {
        assert!(Batch::new(Vec::new()).split(5).is_empty());
    }
}
