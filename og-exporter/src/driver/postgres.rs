// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! PostgreSQL 协议驱动（openGauss 兼容）
//!
//! SQL 通过简单查询协议原样发送，所有单元格以文本格式返回，
//! 再按列类型名解码为 [`RowValue`]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{Connection, Connector, ResultSet};
use crate::config::{ExporterError, ExporterResult};
use crate::dsn::{self, DsnSettings};
use crate::value::RowValue;

/// 获取连接的等待上限
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// 空闲连接回收时间
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// 基于 sqlx 连接池的连接工厂
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    /// 创建连接工厂
    pub fn new() -> Self {
        Self
    }
}

fn first_of(list: &str) -> &str {
    list.split(',').next().unwrap_or(list).trim()
}

/// 由解析后的连接参数构建 sqlx 连接选项
///
/// 未识别的参数作为运行时参数下发
pub fn connect_options(settings: &DsnSettings) -> ExporterResult<PgConnectOptions> {
    let mut options = PgConnectOptions::new();
    let mut runtime_params: Vec<(String, String)> = Vec::new();

    for (key, value) in settings {
        match key.as_str() {
            "host" => options = options.host(first_of(value)),
            "port" => {
                let port = first_of(value)
                    .parse::<u16>()
                    .map_err(|_| ExporterError::Connection(format!("invalid port: {}", value)))?;
                options = options.port(port);
            }
            "user" => options = options.username(value),
            "password" => options = options.password(value),
            "database" => options = options.database(value),
            "sslmode" => {
                let mode = PgSslMode::from_str(value)
                    .map_err(|e| ExporterError::Connection(format!("invalid sslmode {}: {}", value, e)))?;
                options = options.ssl_mode(mode);
            }
            "sslrootcert" => options = options.ssl_root_cert(value.as_str()),
            "application_name" => options = options.application_name(value),
            // 仅对 libpq 有意义的参数
            "connect_timeout" | "sslcert" | "sslkey" | "target_session_attrs" => {}
            _ => runtime_params.push((key.clone(), value.clone())),
        }
    }

    if !runtime_params.is_empty() {
        options = options.options(runtime_params);
    }
    Ok(options)
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, dsn: &str, max_connections: u32) -> ExporterResult<Arc<dyn Connection>> {
        let settings = dsn::parse_dsn(dsn)?;
        let options = connect_options(&settings)?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_with(options)
            .await
            .map_err(|e| ExporterError::Connection(e.to_string()))?;

        Ok(Arc::new(PgConnection { pool }))
    }
}

/// 基于 sqlx 连接池的连接
#[derive(Debug, Clone)]
pub struct PgConnection {
    pool: PgPool,
}

#[async_trait]
impl Connection for PgConnection {
    async fn ping(&self) -> ExporterResult<()> {
        sqlx::raw_sql("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| ExporterError::Connection(e.to_string()))
    }

    async fn query(&self, sql: &str) -> ExporterResult<ResultSet> {
        let rows = sqlx::raw_sql(sql).fetch_all(&self.pool).await.map_err(map_query_error)?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(decode_row).collect::<ExporterResult<Vec<_>>>()?;

        Ok(ResultSet { columns, rows })
    }

    async fn close(&self) -> ExporterResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn map_query_error(e: sqlx::Error) -> ExporterError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
            ExporterError::Connection(e.to_string())
        }
        other => ExporterError::Query(other.to_string()),
    }
}

fn decode_row(row: &PgRow) -> ExporterResult<Vec<RowValue>> {
    (0..row.len())
        .map(|idx| {
            let raw = row
                .try_get_raw(idx)
                .map_err(|e| ExporterError::Query(format!("column {}: {}", idx, e)))?;
            if raw.is_null() {
                return Ok(RowValue::Null);
            }
            let type_name = raw.type_info().name().to_string();
            let text = raw
                .as_str()
                .map_err(|e| ExporterError::Query(format!("column {}: {}", idx, e)))?;
            Ok(decode_text(&type_name, text))
        })
        .collect()
}

/// 按列类型名解码文本格式的单元格
///
/// 无法按类型解析的值保留为文本，由采集层决定如何处理
pub fn decode_text(type_name: &str, text: &str) -> RowValue {
    match type_name {
        "BOOL" => match text {
            "t" | "true" => RowValue::Boolean(true),
            "f" | "false" => RowValue::Boolean(false),
            _ => RowValue::Text(text.to_string()),
        },
        "INT2" | "INT4" | "INT8" | "OID" | "XID" | "CID" => {
            text.parse().map(RowValue::Integer).unwrap_or_else(|_| RowValue::Text(text.to_string()))
        }
        "FLOAT4" | "FLOAT8" | "NUMERIC" => {
            text.parse().map(RowValue::Float).unwrap_or_else(|_| RowValue::Text(text.to_string()))
        }
        "TIMESTAMPTZ" => parse_timestamptz(text)
            .map(RowValue::Timestamp)
            .unwrap_or_else(|| RowValue::Text(text.to_string())),
        "TIMESTAMP" => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map(|ts| RowValue::Timestamp(ts.and_utc()))
            .unwrap_or_else(|_| RowValue::Text(text.to_string())),
        "BYTEA" => text
            .strip_prefix("\\x")
            .and_then(|hex_str| hex::decode(hex_str).ok())
            .map(RowValue::Bytes)
            .unwrap_or_else(|| RowValue::Bytes(text.as_bytes().to_vec())),
        _ => RowValue::Text(text.to_string()),
    }
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    // 服务端输出的时区偏移可能只有小时部分，例如 `+08`
    let normalised = match text.rfind(['+', '-']) {
        Some(pos) if pos > 10 && text.len() - pos == 3 => format!("{}:00", text),
        _ => text.to_string(),
    };
    DateTime::parse_from_str(&normalised, "%Y-%m-%d %H:%M:%S%.f%:z")
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
