// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 驱动适配层
//!
//! 采集核心只依赖 [`Connector`] 与 [`Connection`] 两个 trait，
//! 具体数据库驱动在此层把结果集解码为 [`RowValue`]

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ExporterResult;
use crate::value::RowValue;

#[cfg(feature = "postgres")]
pub use postgres::PgConnector;

/// 查询结果集
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// 列名（结果集顺序）
    pub columns: Vec<String>,
    /// 行数据，每行与 `columns` 等长
    pub rows: Vec<Vec<RowValue>>,
}

impl ResultSet {
    /// 创建结果集
    pub fn new(columns: Vec<String>, rows: Vec<Vec<RowValue>>) -> Self {
        Self { columns, rows }
    }

    /// 查找列下标
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// 读取第一行第一列
    pub fn scalar(&self) -> Option<&RowValue> {
        self.rows.first().and_then(|row| row.first())
    }

    /// 行数
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否没有行
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 已建立的数据库连接（可以是内部连接池）
#[async_trait]
pub trait Connection: Send + Sync {
    /// 存活探测
    async fn ping(&self) -> ExporterResult<()>;

    /// 原样执行 SQL 并返回全部行
    async fn query(&self, sql: &str) -> ExporterResult<ResultSet>;

    /// 关闭连接
    async fn close(&self) -> ExporterResult<()>;
}

/// 连接工厂
#[async_trait]
pub trait Connector: Send + Sync {
    /// 按连接串建立连接，`max_connections` 为内部连接池上限
    async fn connect(&self, dsn: &str, max_connections: u32) -> ExporterResult<Arc<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// TEST-U-1001: 结果集辅助方法测试
    #[test]
    fn test_result_set_helpers() {
        let rs = ResultSet::new(
            vec!["datname".to_string(), "size".to_string()],
            vec![vec![RowValue::from("postgres"), RowValue::from(42i64)]],
        );

        assert_eq!(rs.column_index("size"), Some(1));
        assert_eq!(rs.column_index("missing"), None);
        assert_eq!(rs.scalar(), Some(&RowValue::Text("postgres".to_string())));
        assert_eq!(rs.len(), 1);
        assert!(ResultSet::default().is_empty());
    }
}
