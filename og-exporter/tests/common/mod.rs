// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 测试辅助模块
//!
//! 提供内存中的脚本化驱动：按 SQL 返回预置结果、失败或延迟，
//! 并记录执行过的语句与同时执行的最大查询数

#![allow(dead_code)]

use async_trait::async_trait;
use og_exporter::driver::{Connection, Connector, ResultSet};
use og_exporter::server::{ROLE_SQL, VERSION_SQL};
use og_exporter::{ExporterConfig, ExporterError, ExporterResult, RowValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// 默认的版本字符串
pub const VERSION_STRING: &str =
    "(openGauss 3.0.0 build 02c14696) compiled at 2022-04-01 18:12:34 commit 0 last mr on x86_64-unknown-linux-gnu";

/// 预置的查询响应
#[derive(Debug, Clone)]
pub enum Reply {
    /// 返回结果集
    Rows(ResultSet),
    /// 返回查询错误
    QueryError(String),
    /// 返回连接错误
    ConnectionError(String),
}

#[derive(Debug, Clone)]
struct Script {
    reply: Reply,
    delay: Duration,
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<HashMap<String, Script>>,
    executed: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    connect_failures: AtomicU32,
    connects: AtomicU32,
    ping_failures: AtomicU32,
    connect_delay: Mutex<Duration>,
}

/// 脚本化驱动
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// 创建主库角色、版本 3.0.0 的驱动
    pub fn new() -> Self {
        let connector = Self::default();
        connector.reply(ROLE_SQL, Reply::Rows(scalar(RowValue::Boolean(false))));
        connector.reply(VERSION_SQL, Reply::Rows(scalar(RowValue::from(VERSION_STRING))));
        connector
    }

    /// 设置语句的响应
    pub fn reply(&self, sql: &str, reply: Reply) {
        self.reply_after(sql, reply, Duration::ZERO);
    }

    /// 设置语句的响应，并在返回前等待
    pub fn reply_after(&self, sql: &str, reply: Reply, delay: Duration) {
        self.state
            .scripts
            .lock()
            .insert(sql.trim().to_string(), Script { reply, delay });
    }

    /// 接下来 `count` 次建立连接失败
    pub fn fail_connects(&self, count: u32) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// 接下来 `count` 次存活探测失败
    pub fn fail_pings(&self, count: u32) {
        self.state.ping_failures.store(count, Ordering::SeqCst);
    }

    /// 每次建立连接前等待
    pub fn delay_connects(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// 建立连接的尝试次数（包括失败）
    pub fn connect_attempts(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// 同时执行的最大查询数
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// 语句被执行的次数
    pub fn executions(&self, sql: &str) -> usize {
        self.state
            .executed
            .lock()
            .iter()
            .filter(|(_, executed)| executed == sql.trim())
            .count()
    }

    /// 在指定连接串上执行过的语句
    pub fn executed_on(&self, dsn: &str) -> Vec<String> {
        self.state
            .executed
            .lock()
            .iter()
            .filter(|(target, _)| target == dsn)
            .map(|(_, sql)| sql.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, dsn: &str, _max_connections: u32) -> ExporterResult<Arc<dyn Connection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if take_budget(&self.state.connect_failures) {
            return Err(ExporterError::Connection("connection refused".to_string()));
        }
        Ok(Arc::new(MockConnection {
            dsn: dsn.to_string(),
            state: self.state.clone(),
        }))
    }
}

fn take_budget(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct MockConnection {
    dsn: String,
    state: Arc<MockState>,
}

struct InFlight<'a>(&'a MockState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState) -> Self {
        let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(current, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn ping(&self) -> ExporterResult<()> {
        if take_budget(&self.state.ping_failures) {
            return Err(ExporterError::Connection("server closed the connection".to_string()));
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> ExporterResult<ResultSet> {
        let sql = sql.trim().to_string();
        self.state.executed.lock().push((self.dsn.clone(), sql.clone()));
        let script = self.state.scripts.lock().get(&sql).cloned();

        let _guard = InFlight::enter(&self.state);
        let Some(script) = script else {
            return Ok(ResultSet::default());
        };
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        match script.reply {
            Reply::Rows(rows) => Ok(rows),
            Reply::QueryError(message) => Err(ExporterError::Query(message)),
            Reply::ConnectionError(message) => Err(ExporterError::Connection(message)),
        }
    }

    async fn close(&self) -> ExporterResult<()> {
        Ok(())
    }
}

/// 单行单列结果集
pub fn scalar(value: RowValue) -> ResultSet {
    ResultSet::new(vec!["value".to_string()], vec![vec![value]])
}

/// 构造结果集
pub fn rows(columns: &[&str], rows: Vec<Vec<RowValue>>) -> ResultSet {
    ResultSet::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

/// 在目录中写入查询定义文件
pub fn write_queries(dir: &Path, file: &str, yaml: &str) {
    std::fs::write(dir.join(file), yaml).expect("write query config");
}

/// 测试用导出器配置：单次连接尝试，不退避
pub fn test_config(dsn: &str) -> ExporterConfig {
    ExporterConfig {
        dsn: vec![dsn.to_string()],
        retry_attempts: 1,
        retry_backoff_ms: 0,
        ..Default::default()
    }
}
