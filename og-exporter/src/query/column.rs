// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 列定义
//!
//! 描述结果集中每一列的投影规则

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;

/// 列用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnUsage {
    /// 丢弃，不产生任何输出
    #[default]
    Discard,
    /// 作为标签
    Label,
    /// 单调递增计数器
    Counter,
    /// 瞬时值
    Gauge,
    /// 直方图（识别但不在本层做分桶转换）
    Histogram,
    /// 外部映射的数值
    MappedMetric,
    /// 时长，指标名带 `_milliseconds` 后缀
    Duration,
}

impl ColumnUsage {
    /// 解析用途字符串（不区分大小写），未知用途返回 `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISCARD" => Some(ColumnUsage::Discard),
            "LABEL" => Some(ColumnUsage::Label),
            "COUNTER" => Some(ColumnUsage::Counter),
            "GAUGE" => Some(ColumnUsage::Gauge),
            "HISTOGRAM" => Some(ColumnUsage::Histogram),
            "MAPPED_METRIC" | "MAPPEDMETRIC" => Some(ColumnUsage::MappedMetric),
            "DURATION" => Some(ColumnUsage::Duration),
            _ => None,
        }
    }

    /// 规范化后的大写名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnUsage::Discard => "DISCARD",
            ColumnUsage::Label => "LABEL",
            ColumnUsage::Counter => "COUNTER",
            ColumnUsage::Gauge => "GAUGE",
            ColumnUsage::Histogram => "HISTOGRAM",
            ColumnUsage::MappedMetric => "MAPPED_METRIC",
            ColumnUsage::Duration => "DURATION",
        }
    }

    /// 该列的值是否被丢弃（标签列的值只用于标签）
    pub fn is_discarded(&self) -> bool {
        matches!(self, ColumnUsage::Discard | ColumnUsage::Label)
    }

    /// 是否为数值指标列
    pub fn is_value(&self) -> bool {
        !self.is_discarded()
    }
}

impl fmt::Display for ColumnUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 列定义
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    /// 列名，与结果集列名一致
    pub name: String,

    /// 描述，用作指标 HELP
    #[serde(default, rename = "desc", skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// 替代名称
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rename: String,

    /// 用途，校验后规范化为大写
    #[serde(default)]
    pub usage: String,

    #[serde(skip)]
    pub(crate) kind: ColumnUsage,
}

impl Column {
    /// 创建列定义
    pub fn new(name: impl Into<String>, usage: ColumnUsage, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            rename: String::new(),
            usage: usage.as_str().to_string(),
            kind: usage,
        }
    }

    /// 校验用途并规范化
    pub(crate) fn check(&mut self) -> Result<(), ConfigError> {
        let kind = ColumnUsage::parse(&self.usage).ok_or_else(|| ConfigError::InvalidUsage {
            column: self.name.clone(),
            usage: self.usage.clone(),
        })?;
        self.kind = kind;
        self.usage = kind.as_str().to_string();
        Ok(())
    }

    /// 列用途
    pub fn kind(&self) -> ColumnUsage {
        self.kind
    }

    /// 输出名称，优先使用 rename
    pub fn output_name(&self) -> &str {
        if self.rename.is_empty() { &self.name } else { &self.rename }
    }
}
