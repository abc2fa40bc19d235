// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! pg_settings 运行参数指标
//!
//! 布尔、整数与实数类型的参数以 `<namespace>_settings_<name>[_unit]` 仪表输出，
//! 时间单位统一换算为秒，存储单位统一换算为字节

use std::time::Duration;

use crate::config::{ExporterError, ExporterResult};
use crate::driver::{Connection, ResultSet};
use crate::metrics::{Sample, ValueType, build_metric_name};

/// 读取运行参数的 SQL
pub const SETTINGS_SQL: &str = "SELECT name, setting, COALESCE(unit, ''), short_desc, vartype \
     FROM pg_settings WHERE vartype IN ('bool', 'integer', 'real')";

/// 读取运行参数的时间上限
pub const SETTINGS_TIMEOUT: Duration = Duration::from_secs(1);

/// 运行参数在错误映射中使用的名称
pub const SETTINGS_FAMILY: &str = "pg_settings";

/// 一条运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgSetting {
    /// 参数名
    pub name: String,
    /// 参数值（文本）
    pub setting: String,
    /// 单位，可能为空
    pub unit: String,
    /// 简短描述
    pub short_desc: String,
    /// 参数类型：bool / integer / real
    pub var_type: String,
}

impl PgSetting {
    /// 解析数值并换算单位，返回 `(值, 规范单位)`
    ///
    /// `-1` 是特殊值，不做换算
    ///
    /// # Errors
    ///
    /// 值不是数字或单位未知时返回错误描述
    pub fn normalise_unit(&self) -> Result<(f64, &'static str), String> {
        let value: f64 = self
            .setting
            .trim()
            .parse()
            .map_err(|e| format!("Error converting setting {:?} value {:?} to float: {}", self.name, self.setting, e))?;

        let (unit, factor) = match self.unit.as_str() {
            "" => return Ok((value, "")),
            "ms" => ("seconds", 1.0),
            "s" => ("seconds", 1.0),
            "min" => ("seconds", 60.0),
            "h" => ("seconds", 60.0 * 60.0),
            "d" => ("seconds", 60.0 * 60.0 * 24.0),
            "B" => ("bytes", 1.0),
            "kB" => ("bytes", 2f64.powi(10)),
            "MB" => ("bytes", 2f64.powi(20)),
            "GB" => ("bytes", 2f64.powi(30)),
            "TB" => ("bytes", 2f64.powi(40)),
            "8kB" => ("bytes", 2f64.powi(13)),
            "16kB" => ("bytes", 2f64.powi(14)),
            "32kB" => ("bytes", 2f64.powi(15)),
            "16MB" => ("bytes", 2f64.powi(24)),
            "32MB" => ("bytes", 2f64.powi(25)),
            "64MB" => ("bytes", 2f64.powi(26)),
            other => return Err(format!("Unknown unit for runtime variable {:?}: {:?}", self.name, other)),
        };

        if value == -1.0 {
            return Ok((value, unit));
        }
        if self.unit == "ms" {
            return Ok((value / 1000.0, unit));
        }
        Ok((value * factor, unit))
    }

    /// 转换为样本
    ///
    /// # Errors
    ///
    /// 单位换算失败或参数类型不受支持时返回错误描述
    pub fn to_sample(&self, namespace: &str, labels: &[(String, String)]) -> Result<Sample, String> {
        let mut name = self.name.replace('.', "_");
        let mut help = self.short_desc.clone();

        let value = match self.var_type.as_str() {
            "bool" => {
                if self.setting == "on" {
                    1.0
                } else {
                    0.0
                }
            }
            "integer" | "real" => {
                let (value, unit) = self.normalise_unit()?;
                if !unit.is_empty() {
                    name = format!("{}_{}", name, unit);
                    help = format!("{} [Units converted to {}.]", help, unit);
                }
                value
            }
            other => return Err(format!("Unsupported vartype {:?} for setting {:?}", other, self.name)),
        };

        Ok(
            Sample::new(build_metric_name(&[namespace, "settings", &name]), help, ValueType::Gauge, value)
                .with_labels(labels.iter().cloned()),
        )
    }
}

/// 将结果集解析为运行参数列表
pub fn parse_settings(result: &ResultSet) -> Vec<PgSetting> {
    result
        .rows
        .iter()
        .filter(|row| row.len() >= 5)
        .map(|row| PgSetting {
            name: row[0].to_label(false),
            setting: row[1].to_label(false),
            unit: row[2].to_label(false),
            short_desc: row[3].to_label(false),
            var_type: row[4].to_label(false),
        })
        .collect()
}

/// 读取运行参数并转换为样本
///
/// 单个参数转换失败只记录为非致命错误
///
/// # Errors
///
/// 查询执行失败时返回错误
pub async fn query_settings(
    connection: &dyn Connection,
    namespace: &str,
    labels: &[(String, String)],
) -> ExporterResult<(Vec<Sample>, Vec<String>)> {
    let result = connection
        .query(SETTINGS_SQL)
        .await
        .map_err(|e| match e {
            ExporterError::Query(msg) => ExporterError::Query(format!("Error retrieving settings: {}", msg)),
            other => other,
        })?;

    let mut samples = Vec::new();
    let mut errors = Vec::new();
    for setting in parse_settings(&result) {
        match setting.to_sample(namespace, labels) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                tracing::warn!("Skip setting {}: {}", setting.name, e);
                errors.push(e);
            }
        }
    }
    Ok((samples, errors))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(name: &str, value: &str, unit: &str, var_type: &str) -> PgSetting {
        PgSetting {
            name: name.to_string(),
            setting: value.to_string(),
            unit: unit.to_string(),
            short_desc: "desc".to_string(),
            var_type: var_type.to_string(),
        }
    }

    /// TEST-U-1301: 单位换算测试
    #[test]
    fn test_normalise_unit() {
        let cases = [
            ("10", "ms", 0.01, "seconds"),
            ("2", "min", 120.0, "seconds"),
            ("1", "d", 86400.0, "seconds"),
            ("4", "kB", 4096.0, "bytes"),
            ("1", "8kB", 8192.0, "bytes"),
            ("1", "16MB", 16777216.0, "bytes"),
            ("-1", "kB", -1.0, "bytes"),
            ("3", "", 3.0, ""),
        ];
        for (value, unit, expected, expected_unit) in cases {
            let (actual, actual_unit) = setting("x", value, unit, "integer").normalise_unit().unwrap();
            assert_eq!(actual, expected, "{} {}", value, unit);
            assert_eq!(actual_unit, expected_unit);
        }

        assert!(setting("x", "1", "parsec", "integer").normalise_unit().is_err());
        assert!(setting("x", "abc", "kB", "integer").normalise_unit().is_err());
    }

    /// TEST-U-1302: 参数转换为样本测试
    #[test]
    fn test_to_sample() {
        let labels = vec![("server".to_string(), "db:5432".to_string())];

        let shared = setting("shared_buffers", "128", "8kB", "integer")
            .to_sample("pg", &labels)
            .unwrap();
        assert_eq!(shared.name, "pg_settings_shared_buffers_bytes");
        assert_eq!(shared.value, 128.0 * 8192.0);
        assert_eq!(shared.help, "desc [Units converted to bytes.]");
        assert_eq!(shared.label("server"), Some("db:5432"));

        let fsync = setting("fsync", "on", "", "bool").to_sample("pg", &labels).unwrap();
        assert_eq!(fsync.name, "pg_settings_fsync");
        assert_eq!(fsync.value, 1.0);

        let dotted = setting("plugin.level", "off", "", "bool").to_sample("pg", &[]).unwrap();
        assert_eq!(dotted.name, "pg_settings_plugin_level");
        assert_eq!(dotted.value, 0.0);

        assert!(setting("x", "1", "parsec", "real").to_sample("pg", &[]).is_err());
        assert!(setting("x", "abc", "", "string").to_sample("pg", &[]).is_err());
    }
}
