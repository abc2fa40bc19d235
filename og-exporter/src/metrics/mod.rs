// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 指标样本模块
//!
//! 采集引擎产出与指标库无关的 [`Sample`]，在暴露前按名称分组转换为
//! Prometheus `MetricFamily`

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType, Untyped};
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;

use crate::config::{ExporterError, ExporterResult};

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 计数器
    Counter,
    /// 仪表
    Gauge,
    /// 未知类型
    Untyped,
}

impl ValueType {
    fn metric_type(&self) -> MetricType {
        match self {
            ValueType::Counter => MetricType::COUNTER,
            ValueType::Gauge => MetricType::GAUGE,
            ValueType::Untyped => MetricType::UNTYPED,
        }
    }
}

/// 单个指标观测值
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// 完整指标名
    pub name: String,
    /// 帮助信息
    pub help: String,
    /// 指标类型
    pub value_type: ValueType,
    /// 有序标签
    pub labels: Vec<(String, String)>,
    /// 数值，无法表示时为 NaN
    pub value: f64,
}

impl Sample {
    /// 创建无标签样本
    pub fn new(name: impl Into<String>, help: impl Into<String>, value_type: ValueType, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value_type,
            labels: Vec::new(),
            value,
        }
    }

    /// 追加标签
    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// 按名称查找标签值
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn to_metric(&self) -> Metric {
        let labels = self
            .labels
            .iter()
            .map(|(name, value)| {
                let mut pair = LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.clone());
                pair
            })
            .collect();

        let mut metric = Metric::default();
        metric.set_label(labels);
        match self.value_type {
            ValueType::Counter => {
                let mut counter = Counter::default();
                counter.set_value(self.value);
                metric.set_counter(counter);
            }
            ValueType::Gauge => {
                let mut gauge = Gauge::default();
                gauge.set_value(self.value);
                metric.set_gauge(gauge);
            }
            ValueType::Untyped => {
                let mut untyped = Untyped::default();
                untyped.set_value(self.value);
                metric.untyped = Some(untyped).into();
            }
        }
        metric
    }
}

/// 以 `_` 连接非空的名称片段
pub fn build_metric_name(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// 将样本按名称分组为 MetricFamily
///
/// 同名样本以第一次出现的类型与帮助信息为准，类型冲突的样本被丢弃
pub fn into_metric_families(samples: impl IntoIterator<Item = Sample>) -> Vec<MetricFamily> {
    let mut grouped: BTreeMap<String, (String, ValueType, Vec<Metric>)> = BTreeMap::new();

    for sample in samples {
        let metric = sample.to_metric();
        match grouped.get_mut(&sample.name) {
            Some((_, value_type, metrics)) if *value_type == sample.value_type => metrics.push(metric),
            Some((_, value_type, _)) => {
                tracing::warn!(
                    "Dropping sample {} with type {:?}, family already registered as {:?}",
                    sample.name,
                    sample.value_type,
                    value_type
                );
            }
            None => {
                grouped.insert(sample.name.clone(), (sample.help.clone(), sample.value_type, vec![metric]));
            }
        }
    }

    grouped
        .into_iter()
        .map(|(name, (help, value_type, metrics))| {
            let mut family = MetricFamily::default();
            family.set_name(name);
            family.set_help(help);
            family.set_field_type(value_type.metric_type());
            family.set_metric(metrics);
            family
        })
        .collect()
}

/// 以 Prometheus 文本格式编码
///
/// # Errors
///
/// 编码失败时返回 [`ExporterError::Encode`]
pub fn encode_text(families: &[MetricFamily]) -> ExporterResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ExporterError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// TEST-U-701: 指标名拼接测试
    #[test]
    fn test_build_metric_name() {
        assert_eq!(build_metric_name(&["pg", "pg_lock", "count"]), "pg_pg_lock_count");
        assert_eq!(build_metric_name(&["", "pg_lock", "count"]), "pg_lock_count");
    }

    /// TEST-U-702: 分组与文本编码测试
    #[test]
    fn test_group_and_encode() {
        let samples = vec![
            Sample::new("pg_lock_count", "Number of locks", ValueType::Gauge, 3.0)
                .with_labels([("datname", "postgres"), ("mode", "sharelock")]),
            Sample::new("pg_lock_count", "Number of locks", ValueType::Gauge, 1.0)
                .with_labels([("datname", "template1"), ("mode", "sharelock")]),
            Sample::new("pg_xact_commit", "Committed", ValueType::Counter, 42.0),
            Sample::new("pg_lock_count", "conflict", ValueType::Counter, 9.0),
            Sample::new("pg_unknown", "Unknown metric from pg", ValueType::Untyped, f64::NAN),
        ];

        let families = into_metric_families(samples);
        assert_eq!(families.len(), 3);

        let text = encode_text(&families).expect("encodes");
        assert!(text.contains("# TYPE pg_lock_count gauge"));
        assert!(text.contains("pg_lock_count{datname=\"postgres\",mode=\"sharelock\"} 3"));
        assert!(text.contains("pg_lock_count{datname=\"template1\",mode=\"sharelock\"} 1"));
        assert!(!text.contains(" 9\n"));
        assert!(text.contains("# TYPE pg_xact_commit counter"));
        assert!(text.contains("pg_unknown NaN"));
    }

    /// TEST-U-703: 标签查找测试
    #[test]
    fn test_sample_label_lookup() {
        let sample = Sample::new("m", "", ValueType::Gauge, 1.0).with_labels([("server", "h:1")]);

        assert_eq!(sample.label("server"), Some("h:1"));
        assert_eq!(sample.label("missing"), None);
    }
}
