// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 导出器自身运行指标

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, Opts, Registry};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::ExporterResult;

const SUBSYSTEM: &str = "exporter";

pub(super) struct SelfMetrics {
    registry: Registry,
    started: Instant,
    up: Gauge,
    uptime: Gauge,
    last_scrape_time: Gauge,
    scrape_duration: Gauge,
    scrape_total: Counter,
    scrape_errors: Counter,
}

impl SelfMetrics {
    pub(super) fn new(namespace: &str, const_labels: &[(String, String)]) -> ExporterResult<Self> {
        let labels: HashMap<String, String> = const_labels.iter().cloned().collect();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem(SUBSYSTEM)
                .const_labels(labels.clone())
        };

        let registry = Registry::new();
        let up = Gauge::with_opts(opts("up", "always be 1 if your could retrieve metrics"))?;
        let uptime = Gauge::with_opts(opts("uptime", "seconds since exporter primary server inited"))?;
        let last_scrape_time = Gauge::with_opts(opts("last_scrape_time", "seconds since epoch of the last scrape"))?;
        let scrape_duration = Gauge::with_opts(opts("scrape_duration", "seconds exporter spending on scrapping"))?;
        let scrape_total = Counter::with_opts(opts("scrape_total_count", "times exporter was scraped for metrics"))?;
        let scrape_errors = Counter::with_opts(opts(
            "scrape_error_count",
            "times exporter was scraped for metrics and failed",
        ))?;

        let collectors: [Box<dyn Collector>; 6] = [
            Box::new(up.clone()),
            Box::new(uptime.clone()),
            Box::new(last_scrape_time.clone()),
            Box::new(scrape_duration.clone()),
            Box::new(scrape_total.clone()),
            Box::new(scrape_errors.clone()),
        ];
        for collector in collectors {
            registry.register(collector)?;
        }

        Ok(Self {
            registry,
            started: Instant::now(),
            up,
            uptime,
            last_scrape_time,
            scrape_duration,
            scrape_total,
            scrape_errors,
        })
    }

    /// 按目标实例累计值的增量推进计数器
    ///
    /// 累计值变小说明实例被重建，此时整个新值视为增量
    pub(super) fn observe_totals(&self, previous: (u64, u64), current: (u64, u64)) {
        let delta = |prev: u64, cur: u64| if cur >= prev { cur - prev } else { cur };
        self.scrape_total.inc_by(delta(previous.0, current.0) as f64);
        self.scrape_errors.inc_by(delta(previous.1, current.1) as f64);
    }

    pub(super) fn observe_connection_errors(&self, count: u64) {
        if count > 0 {
            self.scrape_errors.inc_by(count as f64);
        }
    }

    pub(super) fn finish_scrape(&self, elapsed: Duration) {
        let now = chrono::Utc::now();
        self.last_scrape_time.set(now.timestamp() as f64);
        self.scrape_duration.set(elapsed.as_secs_f64());
        self.uptime.set(self.started.elapsed().as_secs_f64());
        self.up.set(1.0);
    }

    pub(super) fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}
