// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 结果集到样本的转换

use crate::driver::ResultSet;
use crate::metrics::{Sample, ValueType, build_metric_name};
use crate::query::{ColumnUsage, QueryInstance};

/// 转换参数
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions<'a> {
    /// 指标名前缀
    pub namespace: &'a str,
    /// 时间戳标签输出为 RFC3339
    pub time_to_string: bool,
    /// 追加在每个样本末尾的目标实例标签
    pub target_labels: &'a [(String, String)],
}

/// 转换结果
#[derive(Debug, Default)]
pub struct Converted {
    /// 样本
    pub samples: Vec<Sample>,
    /// 单元格级别的非致命错误
    pub non_fatal_errors: Vec<String>,
}

/// 指标族的名称前缀
///
/// 指标族名称已经带有命名空间前缀时不再重复添加
pub fn family_prefix(namespace: &str, family: &str) -> String {
    if namespace.is_empty() || family.starts_with(&format!("{}_", namespace)) {
        family.to_string()
    } else {
        build_metric_name(&[namespace, family])
    }
}

/// 将一个结果集转换为样本
///
/// 标签按声明顺序取值；无法转换为数值的单元格只丢弃该单元格并记录非致命错误
pub fn convert_rows(query: &QueryInstance, result: &ResultSet, options: ConvertOptions<'_>) -> Converted {
    let prefix = family_prefix(options.namespace, &query.name);
    let label_indices: Vec<(String, Option<usize>)> = query
        .label_names()
        .iter()
        .filter_map(|name| query.column(name))
        .map(|column| (column.output_name().to_string(), result.column_index(&column.name)))
        .collect();

    let mut converted = Converted::default();
    for row in &result.rows {
        let mut labels: Vec<(String, String)> = label_indices
            .iter()
            .map(|(name, idx)| {
                let value = idx
                    .and_then(|i| row.get(i))
                    .map(|v| v.to_label(options.time_to_string))
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect();
        labels.extend(
            options
                .target_labels
                .iter()
                .filter(|(key, _)| label_indices.iter().all(|(name, _)| name != key))
                .cloned(),
        );

        for (idx, column_name) in result.columns.iter().enumerate() {
            let Some(cell) = row.get(idx) else {
                continue;
            };

            let (name, help, value_type) = match query.column(column_name) {
                Some(column) => {
                    let value_type = match column.kind() {
                        ColumnUsage::Discard | ColumnUsage::Label => continue,
                        // 直方图需要桶分解，此层不做数值转换
                        ColumnUsage::Histogram => continue,
                        ColumnUsage::Counter => ValueType::Counter,
                        ColumnUsage::Gauge | ColumnUsage::MappedMetric | ColumnUsage::Duration => ValueType::Gauge,
                    };
                    let name = if column.kind() == ColumnUsage::Duration {
                        build_metric_name(&[&prefix, column.output_name(), "milliseconds"])
                    } else {
                        build_metric_name(&[&prefix, column.output_name()])
                    };
                    (name, column.description.clone(), value_type)
                }
                None => (
                    build_metric_name(&[&prefix, column_name]),
                    format!("Unknown metric from {}", query.name),
                    ValueType::Untyped,
                ),
            };

            match cell.to_f64() {
                Some(value) => converted.samples.push(Sample {
                    name,
                    help,
                    value_type,
                    labels: labels.clone(),
                    value,
                }),
                None => converted.non_fatal_errors.push(format!(
                    "Unexpected error parsing column: {} {} {}",
                    query.name, column_name, cell
                )),
            }
        }
    }

    converted
}
