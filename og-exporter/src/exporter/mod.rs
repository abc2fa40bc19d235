// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 采集编排模块
//!
//! [`Exporter`] 持有合并后的查询定义与目标实例注册表，一次采集依次处理每个连接串：
//! 同一 `host:port` 第一次出现时采集全部指标族与 pg_settings，之后只采集私有指标族。
//! 导出器自身的运行指标注册在独立的 `prometheus::Registry` 中

mod self_metrics;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use prometheus::proto::MetricFamily;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{
    ConfigCorrector, ExporterConfig, ExporterError, ExporterResult, load_query_config, merge_queries, private_queries,
};
use crate::defaults::default_queries;
use crate::driver::Connector;
use crate::dsn::{self, shadow_dsn};
use crate::metrics::{Sample, encode_text, into_metric_families};
use crate::query::QueryMap;
use crate::server::{ServerOptions, Servers};

use self_metrics::SelfMetrics;

#[derive(Debug, Default)]
struct ScrapeState {
    // 每个连接串上一次读到的 (采集次数, 失败次数)
    last_totals: HashMap<String, (u64, u64)>,
}

/// 指标导出器
pub struct Exporter {
    config: ExporterConfig,
    all_queries: Arc<QueryMap>,
    private_queries: Arc<QueryMap>,
    servers: Servers,
    self_metrics: SelfMetrics,
    state: Mutex<ScrapeState>,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("namespace", &self.config.namespace)
            .field("queries", &self.all_queries.len())
            .field("private_queries", &self.private_queries.len())
            .field("servers", &self.servers)
            .finish()
    }
}

impl Exporter {
    /// 使用 PostgreSQL 驱动创建导出器
    ///
    /// 只加载配置与查询定义，不建立连接
    ///
    /// # Errors
    ///
    /// 配置校验或查询定义加载失败时返回错误
    #[cfg(feature = "postgres")]
    pub fn new(config: ExporterConfig) -> ExporterResult<Self> {
        Self::with_connector(config, Arc::new(crate::driver::PgConnector))
    }

    /// 使用指定驱动创建导出器
    ///
    /// # Errors
    ///
    /// 配置校验或查询定义加载失败时返回错误
    pub fn with_connector(config: ExporterConfig, connector: Arc<dyn Connector>) -> ExporterResult<Self> {
        let config = ConfigCorrector::auto_correct(config);
        config.validate()?;

        let defaults = default_queries();
        let all_queries = match config.config_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let user = load_query_config(path)?;
                info!("Loaded {} query definitions from {}", user.len(), path);
                merge_queries(&defaults, &user)
            }
            None => defaults,
        };
        let private = private_queries(&all_queries);
        debug!(
            "Exporter has {} query definitions, {} of them private",
            all_queries.len(),
            private.len()
        );

        let self_metrics = SelfMetrics::new(&config.namespace, &config.labels())?;
        let servers = Servers::new(connector, ServerOptions::from(&config));

        Ok(Self {
            config,
            all_queries: Arc::new(all_queries),
            private_queries: Arc::new(private),
            servers,
            self_metrics,
            state: Mutex::new(ScrapeState::default()),
        })
    }

    /// 生效的配置（已自动修正）
    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// 全部查询定义
    pub fn queries(&self) -> Arc<QueryMap> {
        self.all_queries.clone()
    }

    /// 非公共的查询定义
    pub fn private_queries(&self) -> Arc<QueryMap> {
        self.private_queries.clone()
    }

    /// 目标实例注册表
    pub fn servers(&self) -> &Servers {
        &self.servers
    }

    /// 以 YAML 输出全部查询定义
    ///
    /// # Errors
    ///
    /// 序列化失败时返回错误
    pub fn explain_queries(&self) -> ExporterResult<String> {
        let parts = self
            .all_queries
            .values()
            .map(|query| query.to_yaml())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join("\n"))
    }

    async fn resolve_dsns(&self) -> Vec<String> {
        if !self.config.auto_discovery {
            return self.config.dsn.clone();
        }

        let mut dsns = Vec::new();
        for base in &self.config.dsn {
            let server = match self.servers.get_server(base).await {
                Ok(server) => server,
                Err(e) => {
                    error!("Error opening connection to database ({}): {}", shadow_dsn(base), e);
                    continue;
                }
            };
            let databases = match server.query_databases().await {
                Ok(databases) => databases,
                Err(e) => {
                    error!("Error querying databases ({}): {}", shadow_dsn(base), e);
                    continue;
                }
            };

            dsns.push(base.clone());
            for database in databases {
                if self.config.exclude_databases.contains(&database) {
                    continue;
                }
                match dsn::with_database(base, &database) {
                    Ok(discovered) => dsns.push(discovered),
                    Err(e) => warn!("Unable to build DSN for database {}: {}", database, e),
                }
            }
        }

        let mut seen = HashSet::new();
        dsns.retain(|dsn| seen.insert(dsn.clone()));
        dsns
    }

    /// 执行一轮采集，返回全部目标实例的样本
    ///
    /// 采集串行化执行；单个连接串失败只记录日志并计入失败次数
    pub async fn scrape(&self) -> Vec<Sample> {
        let mut state = self.state.lock().await;
        let begin = Instant::now();

        let dsns = self.resolve_dsns().await;
        let mut scraped: HashSet<String> = HashSet::new();
        let mut samples = Vec::new();
        let mut errors_count = 0usize;
        let mut connection_errors = 0u64;

        for dsn in &dsns {
            let server = match self.servers.get_server(dsn).await {
                Ok(server) => server,
                Err(e) => {
                    error!("Error opening connection to database ({}): {}", shadow_dsn(dsn), e);
                    errors_count += 1;
                    connection_errors += 1;
                    continue;
                }
            };

            // 同一 host:port 的公共指标族只采集一次
            if scraped.insert(server.fingerprint().to_string()) {
                server.set_queries(self.all_queries.clone());
                server.set_collect_settings(true);
            } else {
                server.set_queries(self.private_queries.clone());
                server.set_collect_settings(false);
            }

            let report = server.scrape().await;
            if let Err(e) = report.result() {
                errors_count += 1;
                for (family, message) in &report.errors {
                    debug!("Scrape of {} family {} failed: {}", server.fingerprint(), family, message);
                }
                error!("Scrape of {} failed: {}", server.fingerprint(), e);
            }
            samples.extend(report.into_samples());

            let totals = (server.scrape_total_count(), server.scrape_error_count());
            let previous = state.last_totals.insert(dsn.clone(), totals).unwrap_or_default();
            self.self_metrics.observe_totals(previous, totals);
        }

        self.self_metrics.observe_connection_errors(connection_errors);
        self.self_metrics.finish_scrape(begin.elapsed());
        debug!("Scrape of {} data sources done with {} errors", dsns.len(), errors_count);

        samples
    }

    /// 采集并转换为 MetricFamily，导出器自身指标排在最后
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let samples = self.scrape().await;
        let mut families = into_metric_families(samples);
        families.extend(self.self_metrics.gather());
        families
    }

    /// 采集并以 Prometheus 文本格式输出
    ///
    /// # Errors
    ///
    /// 编码失败时返回错误
    pub async fn render(&self) -> ExporterResult<String> {
        let families = self.gather().await;
        encode_text(&families)
    }

    /// 关闭全部目标实例连接
    pub async fn close(&self) {
        let _state = self.state.lock().await;
        self.servers.close().await;
        info!("Exporter closed");
    }
}
