// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 目标实例模块
//!
//! 一个 [`Server`] 对应一个数据库实例的连接上下文，持有探测到的版本与主备角色、
//! 当前生效的查询定义集合以及指标缓存，并负责编排一轮完整的采集。
//!
//! 状态机：`Unconnected → Connecting → {Ready | Down}`，
//! 连接或查询中发现连接失败时进入 `Down`，重连成功后回到 `Ready`。
//! 角色与版本只在进入 `Ready` 时探测一次

pub mod convert;
pub mod registry;

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::MetricCache;
use crate::config::{ExporterConfig, ExporterError, ExporterResult};
use crate::driver::{Connection, Connector};
use crate::dsn;
use crate::limiter::ConcurrencyLimiter;
use crate::metrics::Sample;
use crate::query::{QueryInstance, QueryMap};
use crate::settings;
use crate::value::RowValue;
use crate::version::{Version, parse_version_string};

pub use convert::{ConvertOptions, Converted, convert_rows};
pub use registry::Servers;

/// 主备角色探测 SQL，返回 true 表示备库
pub const ROLE_SQL: &str = "SELECT pg_is_in_recovery()";

/// 版本探测 SQL
pub const VERSION_SQL: &str = "SELECT version()";

/// 自动发现数据库 SQL
pub const DATABASES_SQL: &str = "SELECT datname FROM pg_database \
     WHERE datallowconn = true AND datistemplate = false AND datname != current_database()";

/// 实例标签名
pub const SERVER_LABEL: &str = "server";

/// 目标实例选项
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// 指标名前缀
    pub namespace: String,
    /// 常量标签
    pub const_labels: Vec<(String, String)>,
    /// 禁用缓存
    pub disable_cache: bool,
    /// 禁用 pg_settings 指标
    pub disable_settings_metrics: bool,
    /// 时间戳标签输出为 RFC3339
    pub time_to_string: bool,
    /// 最大并发查询数
    pub parallel: usize,
    /// 建立连接的最大尝试次数
    pub retry_attempts: u32,
    /// 重试退避步长
    pub retry_backoff: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&ExporterConfig::default())
    }
}

impl From<&ExporterConfig> for ServerOptions {
    fn from(config: &ExporterConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            const_labels: config.labels(),
            disable_cache: config.disable_cache,
            disable_settings_metrics: config.disable_settings_metrics,
            time_to_string: config.time_to_string,
            parallel: config.parallel,
            retry_attempts: config.retry_attempts,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// 尚未连接
    Unconnected,
    /// 正在连接
    Connecting,
    /// 可以采集
    Ready,
    /// 连接失效
    Down,
}

/// 一轮采集的结果
#[derive(Debug, Default)]
pub struct ScrapeReport {
    /// 全部样本（包括来自缓存的样本）
    pub samples: Vec<Sample>,
    /// 指标族名称到致命错误的映射
    pub errors: BTreeMap<String, String>,
    /// 非致命错误数量
    pub non_fatal_errors: usize,
}

impl ScrapeReport {
    /// 汇总结果：存在失败的指标族时返回只包含数量的错误
    pub fn result(&self) -> ExporterResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ExporterError::Scrape {
                failed: self.errors.len(),
            })
        }
    }

    /// 消费报告，得到一次性的样本序列
    pub fn into_samples(self) -> std::vec::IntoIter<Sample> {
        self.samples.into_iter()
    }
}

struct FamilyOutcome {
    name: String,
    samples: Vec<Sample>,
    non_fatal_errors: usize,
    error: Option<ExporterError>,
}

impl FamilyOutcome {
    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            samples: Vec::new(),
            non_fatal_errors: 0,
            error: None,
        }
    }
}

/// 目标实例
pub struct Server {
    dsn: String,
    fingerprint: String,
    labels: Vec<(String, String)>,
    options: ServerOptions,
    state: Mutex<ServerState>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    is_primary: AtomicBool,
    version: Mutex<Version>,
    queries: RwLock<Arc<QueryMap>>,
    collect_settings: AtomicBool,
    cache: MetricCache,
    limiter: ConcurrencyLimiter,
    scrape_total: AtomicU64,
    scrape_errors: AtomicU64,
    reconnecting: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("fingerprint", &self.fingerprint)
            .field("state", &self.state())
            .field("is_primary", &self.is_primary())
            .field("version", &self.version())
            .finish()
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fingerprint)
    }
}

impl Server {
    /// 创建未连接的目标实例
    ///
    /// # Errors
    ///
    /// 连接串无法解析时返回错误
    pub fn new(dsn: &str, options: ServerOptions) -> ExporterResult<Self> {
        let fingerprint = dsn::fingerprint(dsn)?;

        let mut labels = vec![(SERVER_LABEL.to_string(), fingerprint.clone())];
        labels.extend(
            options
                .const_labels
                .iter()
                .filter(|(key, _)| key != SERVER_LABEL)
                .cloned(),
        );

        Ok(Self {
            dsn: dsn.to_string(),
            fingerprint,
            labels,
            limiter: ConcurrencyLimiter::new(options.parallel),
            options,
            state: Mutex::new(ServerState::Unconnected),
            connection: RwLock::new(None),
            is_primary: AtomicBool::new(false),
            version: Mutex::new(Version::default()),
            queries: RwLock::new(Arc::new(QueryMap::new())),
            collect_settings: AtomicBool::new(false),
            cache: MetricCache::new(),
            scrape_total: AtomicU64::new(0),
            scrape_errors: AtomicU64::new(0),
            reconnecting: tokio::sync::Mutex::new(()),
        })
    }

    /// 连接串
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// 实例标识 `host:port`
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 实例标签（server 与常量标签）
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// 选项
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// 当前连接状态
    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// 是否可以采集
    pub fn is_ready(&self) -> bool {
        self.state() == ServerState::Ready
    }

    /// 是否为主库
    pub fn is_primary(&self) -> bool {
        self.is_primary.load(Ordering::SeqCst)
    }

    /// 角色名称
    pub fn role_name(&self) -> &'static str {
        if self.is_primary() { "primary" } else { "standby" }
    }

    /// 探测到的版本
    pub fn version(&self) -> Version {
        *self.version.lock()
    }

    /// 当前生效的查询定义
    pub fn queries(&self) -> Arc<QueryMap> {
        self.queries.read().clone()
    }

    /// 替换当前生效的查询定义
    pub fn set_queries(&self, queries: Arc<QueryMap>) {
        *self.queries.write() = queries;
    }

    /// 本轮是否采集 pg_settings
    pub fn set_collect_settings(&self, enabled: bool) {
        self.collect_settings.store(enabled, Ordering::SeqCst);
    }

    /// 指标缓存
    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    /// 并发限制器
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// 累计采集的指标族次数
    pub fn scrape_total_count(&self) -> u64 {
        self.scrape_total.load(Ordering::SeqCst)
    }

    /// 累计失败的指标族次数
    pub fn scrape_error_count(&self) -> u64 {
        self.scrape_errors.load(Ordering::SeqCst)
    }

    /// 串行化同一实例上的重连
    pub(crate) async fn reconnect_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.reconnecting.lock().await
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().clone()
    }

    fn mark_down(&self) {
        let mut state = self.state.lock();
        if *state == ServerState::Ready {
            warn!("Server {} marked down", self.fingerprint);
            *state = ServerState::Down;
        }
    }

    /// 建立连接并探测角色与版本
    ///
    /// 任一步骤失败时丢弃本次建立的连接，状态变为 `Down`
    ///
    /// # Errors
    ///
    /// 连接、存活探测或角色探测失败时返回错误
    pub async fn connect(&self, connector: &dyn Connector) -> ExporterResult<()> {
        self.set_state(ServerState::Connecting);
        let previous = self.connection.write().take();
        if let Some(previous) = previous
            && let Err(e) = previous.close().await
        {
            debug!("Error while closing stale connection to {}: {}", self.fingerprint, e);
        }

        let max_connections = u32::try_from(self.options.parallel.max(1)).unwrap_or(u32::MAX);
        let connection = match connector.connect(&self.dsn, max_connections).await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_state(ServerState::Down);
                return Err(e);
            }
        };

        if let Err(e) = self.detect(connection.as_ref()).await {
            if let Err(close_err) = connection.close().await {
                error!("Error while closing non-pinging DB connection to {}: {}", self.fingerprint, close_err);
            }
            self.set_state(ServerState::Down);
            return Err(e);
        }

        *self.connection.write() = Some(connection);
        self.set_state(ServerState::Ready);
        info!(
            "Established new database connection to {} ({}, version {})",
            self.fingerprint,
            self.role_name(),
            self.version()
        );
        Ok(())
    }

    async fn detect(&self, connection: &dyn Connection) -> ExporterResult<()> {
        connection.ping().await?;

        let role = connection.query(ROLE_SQL).await?;
        let in_recovery = match role.scalar() {
            Some(RowValue::Boolean(value)) => *value,
            Some(other) => other.to_f64() == Some(1.0) || matches!(other.to_label(false).as_str(), "t" | "true"),
            None => false,
        };
        self.is_primary.store(!in_recovery, Ordering::SeqCst);

        let version = match connection.query(VERSION_SQL).await {
            Ok(result) => {
                let text = result.scalar().map(|v| v.to_label(false)).unwrap_or_default();
                parse_version_string(&text).unwrap_or_else(|| {
                    warn!("Unable to parse version string {:?} from {}", text, self.fingerprint);
                    Version::default()
                })
            }
            Err(e) => {
                warn!("Unable to detect version of {}: {}", self.fingerprint, e);
                Version::default()
            }
        };
        *self.version.lock() = version;

        debug!(
            "Detected {} as {} with version {}",
            self.fingerprint,
            self.role_name(),
            version
        );
        Ok(())
    }

    /// 存活探测
    ///
    /// 失败时关闭连接并进入 `Down`
    ///
    /// # Errors
    ///
    /// 未连接或探测失败时返回连接错误
    pub async fn ping(&self) -> ExporterResult<()> {
        let Some(connection) = self.connection() else {
            return Err(ExporterError::Connection(format!("{} is not connected", self.fingerprint)));
        };

        if let Err(e) = connection.ping().await {
            self.connection.write().take();
            self.set_state(ServerState::Down);
            if let Err(close_err) = connection.close().await {
                error!("Error while closing non-pinging DB connection to {}: {}", self.fingerprint, close_err);
            }
            return Err(ExporterError::Connection(e.to_string()));
        }
        Ok(())
    }

    /// 执行一轮采集
    ///
    /// 指标族在并发限制下并行执行，单个指标族失败不影响其他指标族
    pub async fn scrape(&self) -> ScrapeReport {
        let mut report = ScrapeReport::default();
        let Some(connection) = self.connection().filter(|_| self.is_ready()) else {
            report.errors.insert(
                self.fingerprint.clone(),
                format!("{} is not connected", self.fingerprint),
            );
            return report;
        };

        let queries = self.queries();
        let version = self.version();
        let is_primary = self.is_primary();

        let settings_task = async {
            if self.collect_settings.load(Ordering::SeqCst) && is_primary && !self.options.disable_settings_metrics {
                Some(self.scrape_settings(connection.as_ref()).await)
            } else {
                None
            }
        };
        let family_tasks = futures::future::join_all(
            queries
                .values()
                .map(|query| self.scrape_family(query, &connection, version, is_primary)),
        );
        let (settings_result, outcomes) = tokio::join!(settings_task, family_tasks);

        match settings_result {
            Some(Ok((samples, errors))) => {
                report.samples.extend(samples);
                report.non_fatal_errors += errors.len();
            }
            Some(Err(e)) => {
                error!("Error retrieving settings on {}: {}", self.fingerprint, e);
                if e.is_connection() {
                    self.mark_down();
                }
                report
                    .errors
                    .insert(settings::SETTINGS_FAMILY.to_string(), e.to_string());
            }
            None => {}
        }

        for outcome in outcomes {
            report.samples.extend(outcome.samples);
            report.non_fatal_errors += outcome.non_fatal_errors;
            if let Some(e) = outcome.error {
                report.errors.insert(outcome.name, e.to_string());
            }
        }

        if !report.errors.is_empty() {
            warn!("Scrape of {} returned {} errors", self.fingerprint, report.errors.len());
        }
        report
    }

    async fn scrape_settings(&self, connection: &dyn Connection) -> ExporterResult<(Vec<Sample>, Vec<String>)> {
        let token = self.limiter.acquire().await;
        debug!("Querying pg_settings view on {}", self.fingerprint);
        let result = tokio::time::timeout(
            settings::SETTINGS_TIMEOUT,
            settings::query_settings(connection, &self.options.namespace, &self.labels),
        )
        .await;
        token.release();

        result.unwrap_or_else(|_| {
            Err(ExporterError::Timeout {
                family: settings::SETTINGS_FAMILY.to_string(),
                timeout: settings::SETTINGS_TIMEOUT,
            })
        })
    }

    async fn scrape_family(
        &self,
        query: &QueryInstance,
        connection: &Arc<dyn Connection>,
        version: Version,
        is_primary: bool,
    ) -> FamilyOutcome {
        let name = query.name.as_str();
        if !query.is_enabled() {
            debug!("Collect Metric [{}] disable. skip", name);
            return FamilyOutcome::skipped(name);
        }
        let Some(variant) = query.select_variant(&version, is_primary) else {
            debug!(
                "Collect Metric [{}] not define querySQL for version {} on {} database",
                name,
                version,
                self.role_name()
            );
            return FamilyOutcome::skipped(name);
        };
        if !variant.is_enabled() {
            debug!("Collect Metric [{}] disable. skip", name);
            return FamilyOutcome::skipped(name);
        }

        self.scrape_total.fetch_add(1, Ordering::SeqCst);

        let ttl = variant.ttl_secs();
        let cache_enabled = variant.cache_mode().resolve(!self.options.disable_cache);
        let cached = if cache_enabled { self.cache.get(name) } else { None };
        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_reusable(ttl)) {
            debug!("Collect Metric [{}] use cache", name);
            return FamilyOutcome {
                name: name.to_string(),
                samples: entry.samples.as_ref().clone(),
                non_fatal_errors: 0,
                error: None,
            };
        }

        let token = self.limiter.acquire().await;
        let begin = Instant::now();
        let executed = match variant.timeout_duration() {
            Some(limit) => {
                debug!("Collect Metric [{}] executing with time limit: {:?}", name, limit);
                match tokio::time::timeout(limit, connection.query(&variant.sql)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExporterError::Timeout {
                        family: name.to_string(),
                        timeout: limit,
                    }),
                }
            }
            None => connection.query(&variant.sql).await,
        };
        token.release();
        debug!(
            "Collect Metric [{}] executing using time {}ms",
            name,
            begin.elapsed().as_millis()
        );

        match executed {
            Ok(result) => {
                let converted = convert_rows(
                    query,
                    &result,
                    ConvertOptions {
                        namespace: &self.options.namespace,
                        time_to_string: self.options.time_to_string,
                        target_labels: &self.labels,
                    },
                );
                for e in &converted.non_fatal_errors {
                    warn!("Collect Metric [{}] nonFatalErrors err {}", name, e);
                }
                if cache_enabled && ttl > 0.0 {
                    self.cache
                        .put(name, converted.samples.clone(), converted.non_fatal_errors.clone());
                }
                FamilyOutcome {
                    name: name.to_string(),
                    non_fatal_errors: converted.non_fatal_errors.len(),
                    samples: converted.samples,
                    error: None,
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    error!("Collect Metric [{}] executing timeout {:?}", name, variant.timeout_duration());
                } else {
                    error!("Collect Metric [{}] on {} err {}", name, self.fingerprint, e);
                }
                if e.is_connection() {
                    self.mark_down();
                }
                self.scrape_errors.fetch_add(1, Ordering::SeqCst);

                let stale = cached
                    .filter(|entry| entry.is_valid(ttl))
                    .map(|entry| entry.samples.as_ref().clone())
                    .unwrap_or_default();
                FamilyOutcome {
                    name: name.to_string(),
                    samples: stale,
                    non_fatal_errors: 0,
                    error: Some(e),
                }
            }
        }
    }

    /// 列出实例上可连接的其他非模板数据库
    ///
    /// # Errors
    ///
    /// 未连接或查询失败时返回错误
    pub async fn query_databases(&self) -> ExporterResult<Vec<String>> {
        let Some(connection) = self.connection() else {
            return Err(ExporterError::Connection(format!("{} is not connected", self.fingerprint)));
        };
        let result = connection
            .query(DATABASES_SQL)
            .await
            .map_err(|e| ExporterError::Query(format!("Error retrieving databases: {}", e)))?;

        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first())
            .map(|value| value.to_label(false))
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// 关闭连接
    ///
    /// # Errors
    ///
    /// 驱动关闭失败时返回错误
    pub async fn close(&self) -> ExporterResult<()> {
        let connection = self.connection.write().take();
        self.set_state(ServerState::Unconnected);
        match connection {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}
