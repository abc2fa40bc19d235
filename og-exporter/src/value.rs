// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 行值类型模块
//!
//! 驱动层将每个单元格解码为封闭的 [`RowValue`]，
//! 采集层只通过 [`RowValue::to_f64`] 与 [`RowValue::to_label`] 两个转换函数使用它

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// 查询结果中的单个值
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    /// 整数
    Integer(i64),
    /// 浮点数
    Float(f64),
    /// 布尔值
    Boolean(bool),
    /// 时间戳（统一为 UTC）
    Timestamp(DateTime<Utc>),
    /// 字节序列
    Bytes(Vec<u8>),
    /// 文本
    Text(String),
    /// SQL NULL
    Null,
}

impl RowValue {
    /// 转换为指标数值
    ///
    /// NULL 映射为 NaN，布尔值映射为 1.0/0.0，时间戳映射为 Unix 秒；
    /// 文本与字节序列尝试按浮点数解析，失败时返回 `None`
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            RowValue::Integer(v) => Some(*v as f64),
            RowValue::Float(v) => Some(*v),
            RowValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            RowValue::Timestamp(ts) => Some(ts.timestamp() as f64),
            RowValue::Null => Some(f64::NAN),
            RowValue::Text(s) => parse_float(s),
            RowValue::Bytes(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_float),
        }
    }

    /// 转换为标签值
    ///
    /// NULL 映射为空字符串；时间戳默认输出 Unix 毫秒，
    /// `time_to_string` 为真时输出 RFC3339 字符串
    pub fn to_label(&self, time_to_string: bool) -> String {
        match self {
            RowValue::Integer(v) => v.to_string(),
            RowValue::Float(v) => v.to_string(),
            RowValue::Boolean(v) => v.to_string(),
            RowValue::Timestamp(ts) if time_to_string => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            RowValue::Timestamp(ts) => ts.timestamp_millis().to_string(),
            RowValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            RowValue::Text(s) => s.clone(),
            RowValue::Null => String::new(),
        }
    }

    /// 是否为 NULL
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }
}

// 标准库浮点解析已接受 NaN / Infinity（不区分大小写）
fn parse_float(s: &str) -> Option<f64> {
    s.trim().parse().ok()
}

impl fmt::Display for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValue::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_label(true)),
        }
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::Integer(v)
    }
}

impl From<f64> for RowValue {
    fn from(v: f64) -> Self {
        RowValue::Float(v)
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Boolean(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Text(v.to_string())
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Text(v)
    }
}

impl From<DateTime<Utc>> for RowValue {
    fn from(v: DateTime<Utc>) -> Self {
        RowValue::Timestamp(v)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RowValue::Null)
    }
}
