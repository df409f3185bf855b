//! 列映射合并的性质测试

use proptest::prelude::*;
use quantum_log_db::{merge_additional_columns, ColumnDefinition, ColumnMapping, SqlDataType};

fn column_name() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,8}"
}

proptest! {
    #[test]
    fn prop_merge_keeps_base_and_appends_new_names(names in proptest::collection::vec(column_name(), 0..12)) {
        let base = ColumnMapping::standard();
        let extra: Vec<ColumnDefinition> = names
            .iter()
            .map(|name| ColumnDefinition::additional(name.clone(), SqlDataType::Text))
            .collect();

        let merged = merge_additional_columns(&base, &extra).unwrap();

        // 基础列原样保留在前面
        prop_assert_eq!(&merged.columns()[..base.columns().len()], base.columns());

        // 列名不区分大小写唯一
        let mut seen = std::collections::HashSet::new();
        for column in merged.columns() {
            prop_assert!(seen.insert(column.name.to_ascii_lowercase()));
        }

        // 每个额外列名都出现在结果中
        for name in &names {
            prop_assert!(merged.find(name).is_some());
        }

        // 输入未被修改
        prop_assert_eq!(base.columns().len(), ColumnMapping::standard().columns().len());
    }

    #[test]
    fn prop_merge_is_idempotent(names in proptest::collection::vec(column_name(), 0..8)) {
        let extra: Vec<ColumnDefinition> = names
            .iter()
            .map(|name| ColumnDefinition::additional(name.clone(), SqlDataType::Integer))
            .collect();

        let once = merge_additional_columns(&ColumnMapping::standard(), &extra).unwrap();
        let twice = merge_additional_columns(&once, &extra).unwrap();
        prop_assert_eq!(once.columns(), twice.columns());
    }
}
