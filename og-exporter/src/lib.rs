// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! OG Exporter - openGauss / PostgreSQL 指标采集引擎
//!
//! 按版本与主备角色选择 SQL，将查询结果转换为 Prometheus 指标
//!
//! # 功能特性
//!
//! - **查询定义模型**: YAML 声明式指标族，按版本区间与角色分派 SQL
//! - **并发受限采集**: 每个目标实例的并发查询数有上限
//! - **指标缓存**: 每个指标族独立 TTL
//! - **连接生命周期**: 惰性连接、健康检查、重试与角色/版本重新探测
//! - **部分失败隔离**: 单个指标族失败不影响整次采集
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use og_exporter::{Exporter, ExporterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExporterConfig::from_env()?;
//!     let exporter = Exporter::new(config)?;
//!     println!("{}", exporter.render().await?);
//!     exporter.close().await;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/og-exporter/0.1")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

// ============================================================================
// 模块声明
// ============================================================================

/// 指标缓存模块
pub mod cache;
/// 配置管理模块
pub mod config;
/// 内置查询定义模块
pub mod defaults;
/// 数据库驱动适配模块
pub mod driver;
/// 连接串解析模块
pub mod dsn;
/// 采集编排模块
pub mod exporter;
/// 并发限制模块
pub mod limiter;
/// 指标样本模块
pub mod metrics;
/// 查询定义模块
pub mod query;
/// 目标实例模块
pub mod server;
/// 运行时参数指标模块
pub mod settings;
/// 行值类型模块
pub mod value;
/// 版本解析模块
pub mod version;

// ============================================================================
// 公共导出
// ============================================================================

pub use config::{ConfigError, ExporterConfig, ExporterError, ExporterResult};
pub use exporter::Exporter;
pub use metrics::{Sample, ValueType};
pub use query::{QueryInstance, QueryMap, SqlVariant};
pub use server::{Server, Servers};
pub use value::RowValue;
pub use version::{Version, VersionRange};
