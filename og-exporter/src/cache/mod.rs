// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 指标缓存模块
//!
//! 以指标族名称为键缓存上一次采集的样本。时间戳使用 `tokio::time::Instant`，
//! 记录的是采集**完成**的时刻

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::metrics::Sample;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CachedMetrics {
    /// 样本
    pub samples: Arc<Vec<Sample>>,
    /// 采集完成时间
    pub captured_at: Instant,
    /// 转换过程中的非致命错误
    pub non_fatal_errors: Vec<String>,
}

impl CachedMetrics {
    /// 条目在给定 TTL 下是否仍然有效
    ///
    /// `ttl <= 0` 的条目永远无效
    pub fn is_valid(&self, ttl_secs: f64) -> bool {
        ttl_secs > 0.0 && self.captured_at.elapsed().as_secs_f64() < ttl_secs
    }

    /// 是否可以直接复用：有效、没有非致命错误且样本非空
    pub fn is_reusable(&self, ttl_secs: f64) -> bool {
        self.is_valid(ttl_secs) && self.non_fatal_errors.is_empty() && !self.samples.is_empty()
    }
}

/// 单个目标实例的指标缓存
#[derive(Debug, Default)]
pub struct MetricCache {
    entries: Mutex<HashMap<String, CachedMetrics>>,
}

impl MetricCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取缓存条目
    pub fn get(&self, name: &str) -> Option<CachedMetrics> {
        self.entries.lock().get(name).cloned()
    }

    /// 写入缓存条目，时间戳取当前时刻
    pub fn put(&self, name: &str, samples: Vec<Sample>, non_fatal_errors: Vec<String>) {
        let entry = CachedMetrics {
            samples: Arc::new(samples),
            captured_at: Instant::now(),
            non_fatal_errors,
        };
        self.entries.lock().insert(name.to_string(), entry);
    }

    /// 移除缓存条目
    pub fn remove(&self, name: &str) -> Option<CachedMetrics> {
        self.entries.lock().remove(name)
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
