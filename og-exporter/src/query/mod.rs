// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 查询定义模块
//!
//! 描述一个指标族：针对不同版本与主备角色执行哪条 SQL，哪些列作为标签、
//! 哪些列作为数值，以及缓存与超时策略。
//!
//! 定义在使用前必须经过 [`QueryInstance::check`] 校验，校验可重复执行且结果一致。

pub mod column;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::ConfigError;
use crate::version::{Version, VersionRange};

pub use column::{Column, ColumnUsage};

/// 查询名称到查询定义的映射
pub type QueryMap = BTreeMap<String, QueryInstance>;

/// 未设置超时时使用的默认值（秒）
pub const DEFAULT_TIMEOUT_SECS: f64 = 0.1;

/// 未设置 TTL 时使用的默认值（秒）
pub const DEFAULT_TTL_SECS: f64 = 60.0;

/// 未设置版本区间时使用的默认值
pub const DEFAULT_VERSION_RANGE: &str = ">=0.0.0";

/// 数据库角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbRole {
    /// 主备均可
    #[default]
    Any,
    /// 仅主库
    Primary,
    /// 仅备库
    Standby,
}

impl DbRole {
    /// 解析角色字符串，空字符串视为 [`DbRole::Any`]
    ///
    /// # Errors
    ///
    /// 未知角色返回 [`ConfigError::InvalidRole`]
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(DbRole::Any),
            "primary" => Ok(DbRole::Primary),
            "standby" => Ok(DbRole::Standby),
            _ => Err(ConfigError::InvalidRole(s.to_string())),
        }
    }

    /// 判断角色是否与实例当前主备状态匹配
    pub fn matches(&self, is_primary: bool) -> bool {
        match self {
            DbRole::Any => true,
            DbRole::Primary => is_primary,
            DbRole::Standby => !is_primary,
        }
    }
}

/// 启用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// 启用
    #[default]
    Enable,
    /// 禁用
    Disable,
}

impl Status {
    /// 解析状态字符串，空字符串视为启用
    ///
    /// # Errors
    ///
    /// 未知状态返回 [`ConfigError::InvalidStatus`]
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "enable" => Ok(Status::Enable),
            "disable" => Ok(Status::Disable),
            _ => Err(ConfigError::InvalidStatus(s.to_string())),
        }
    }

    /// 规范化名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Enable => "enable",
            Status::Disable => "disable",
        }
    }
}

/// 缓存开关（三态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// 继承目标实例的全局开关
    #[default]
    Inherit,
    /// 强制启用
    ForceOn,
    /// 强制禁用
    ForceOff,
}

impl CacheMode {
    /// 解析缓存开关字符串
    ///
    /// # Errors
    ///
    /// 未知取值返回 [`ConfigError::InvalidStatus`]
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "inherit" => Ok(CacheMode::Inherit),
            "enable" | "true" | "on" => Ok(CacheMode::ForceOn),
            "disable" | "false" | "off" => Ok(CacheMode::ForceOff),
            _ => Err(ConfigError::InvalidStatus(format!("enableCache: {}", s))),
        }
    }

    /// 结合目标实例的全局开关得出是否启用缓存
    pub fn resolve(&self, target_cache_enabled: bool) -> bool {
        match self {
            CacheMode::Inherit => target_cache_enabled,
            CacheMode::ForceOn => true,
            CacheMode::ForceOff => false,
        }
    }
}

fn normalise_timeout(timeout: Option<f64>) -> f64 {
    match timeout {
        None => DEFAULT_TIMEOUT_SECS,
        Some(t) if t < 0.0 || t.is_nan() => 0.0,
        Some(t) => t,
    }
}

fn normalise_ttl(ttl: Option<f64>) -> f64 {
    match ttl {
        None => DEFAULT_TTL_SECS,
        Some(t) if t < 0.0 || t.is_nan() => 0.0,
        Some(t) => t,
    }
}

/// 按版本与角色区分的 SQL 变体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlVariant {
    /// 所属指标族名称，校验时由指标族回填
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// 描述
    #[serde(default, rename = "desc", skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// 原样下发给驱动的 SQL
    #[serde(default)]
    pub sql: String,

    /// 版本区间谓词
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// 执行控制标签（仅透传）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// 执行超时（秒），0 表示不设截止时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// 缓存有效期（秒），0 表示不缓存
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,

    /// 启用状态
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    /// 缓存开关
    #[serde(default, rename = "enableCache", skip_serializing_if = "String::is_empty")]
    pub enable_cache: String,

    /// 适用的数据库角色
    #[serde(default, rename = "dbRole", skip_serializing_if = "String::is_empty")]
    pub db_role: String,

    #[serde(skip)]
    range: Option<VersionRange>,
    #[serde(skip)]
    role: DbRole,
    #[serde(skip)]
    state: Status,
    #[serde(skip)]
    cache_mode: CacheMode,
}

impl SqlVariant {
    /// 创建一个适用于任意版本与角色的 SQL 变体
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    /// 设置版本区间
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置数据库角色
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.db_role = role.into();
        self
    }

    fn check(&mut self, owner: &OwnerDefaults) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            self.version = DEFAULT_VERSION_RANGE.to_string();
        }
        let range = VersionRange::parse(&self.version)?;
        let role = DbRole::parse(&self.db_role)?;
        let state = Status::parse(&self.status)?;

        if self.enable_cache.trim().is_empty() {
            self.enable_cache = owner.enable_cache.clone();
        }
        let cache_mode = CacheMode::parse(&self.enable_cache)?;

        self.timeout = Some(self.timeout.map_or(owner.timeout, |t| normalise_timeout(Some(t))));
        self.ttl = Some(self.ttl.map_or(owner.ttl, |t| normalise_ttl(Some(t))));
        self.status = state.as_str().to_string();
        self.name = owner.name.clone();

        self.range = Some(range);
        self.role = role;
        self.state = state;
        self.cache_mode = cache_mode;
        Ok(())
    }

    /// 判断该变体是否适用于给定版本与主备状态
    ///
    /// 未经校验的变体不匹配任何版本
    pub fn matches(&self, version: &Version, is_primary: bool) -> bool {
        self.role.matches(is_primary) && self.range.as_ref().is_some_and(|range| range.contains(version))
    }

    /// 是否启用
    pub fn is_enabled(&self) -> bool {
        self.state == Status::Enable
    }

    /// 数据库角色
    pub fn role(&self) -> DbRole {
        self.role
    }

    /// 缓存开关
    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// 执行截止时长，`None` 表示不限时
    pub fn timeout_duration(&self) -> Option<Duration> {
        let secs = normalise_timeout(self.timeout);
        if secs > 0.0 { Some(Duration::from_secs_f64(secs)) } else { None }
    }

    /// 缓存有效期（秒）
    pub fn ttl_secs(&self) -> f64 {
        normalise_ttl(self.ttl)
    }
}

struct OwnerDefaults {
    name: String,
    timeout: f64,
    ttl: f64,
    enable_cache: String,
}

/// 校验后派生的只读索引
#[derive(Debug, Clone, Default, PartialEq)]
struct Derived {
    checked: bool,
    status: Status,
    columns_by_name: HashMap<String, usize>,
    column_names: Vec<String>,
    label_names: Vec<String>,
    value_names: Vec<String>,
}

/// 指标族定义
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryInstance {
    /// 指标族名称，作为指标名前缀
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// 描述
    #[serde(default, rename = "desc", skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// SQL 变体，按声明顺序匹配
    #[serde(default, rename = "query")]
    pub variants: Vec<SqlVariant>,

    /// 列定义，标签列的声明顺序决定标签元组
    #[serde(default, rename = "metrics")]
    pub columns: Vec<Column>,

    /// 整个指标族的启用状态
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    /// 缓存开关
    #[serde(default, rename = "enableCache", skip_serializing_if = "String::is_empty")]
    pub enable_cache: String,

    /// 缓存有效期（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,

    /// 合并优先级，采集时不使用
    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i32,

    /// 执行超时（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// 自动发现模式下的公共指标，每个实例只采集一次
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub public: bool,

    /// 定义来源文件
    #[serde(skip)]
    pub path: String,

    #[serde(skip)]
    derived: Derived,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl QueryInstance {
    /// 创建指标族定义
    pub fn new(name: impl Into<String>, variants: Vec<SqlVariant>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            variants,
            columns,
            ..Default::default()
        }
    }

    /// 校验定义、补齐默认值并构建派生索引
    ///
    /// 可重复调用，多次调用得到相同的派生索引
    ///
    /// # Errors
    ///
    /// 列用途未知、状态或角色未知、版本区间无法解析时返回错误
    pub fn check(&mut self) -> Result<(), ConfigError> {
        let timeout = normalise_timeout(self.timeout);
        let ttl = normalise_ttl(self.ttl);
        let status = Status::parse(&self.status)?;
        CacheMode::parse(&self.enable_cache)?;

        self.timeout = Some(timeout);
        self.ttl = Some(ttl);
        self.status = status.as_str().to_string();

        let owner = OwnerDefaults {
            name: self.name.clone(),
            timeout,
            ttl,
            enable_cache: self.enable_cache.clone(),
        };
        for variant in &mut self.variants {
            variant.check(&owner)?;
        }

        let mut derived = Derived {
            checked: true,
            status,
            ..Default::default()
        };
        for (idx, column) in self.columns.iter_mut().enumerate() {
            column.check()?;
            match column.kind() {
                ColumnUsage::Label => derived.label_names.push(column.name.clone()),
                ColumnUsage::Discard => {}
                _ => derived.value_names.push(column.name.clone()),
            }
            derived.column_names.push(column.name.clone());
            derived.columns_by_name.insert(column.name.clone(), idx);
        }

        self.derived = derived;
        Ok(())
    }

    /// 是否已经通过校验
    pub fn is_checked(&self) -> bool {
        self.derived.checked
    }

    /// 整个指标族是否启用
    pub fn is_enabled(&self) -> bool {
        self.derived.status == Status::Enable
    }

    /// 选择第一个与版本、主备状态都匹配的 SQL 变体
    ///
    /// 没有匹配时返回 `None`，表示本轮不适用，而不是错误
    pub fn select_variant(&self, version: &Version, is_primary: bool) -> Option<&SqlVariant> {
        self.variants.iter().find(|variant| variant.matches(version, is_primary))
    }

    /// 按列名查找列定义
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.derived.columns_by_name.get(name).map(|idx| &self.columns[*idx])
    }

    /// 全部列名（声明顺序）
    pub fn column_names(&self) -> &[String] {
        &self.derived.column_names
    }

    /// 标签列名（声明顺序）
    pub fn label_names(&self) -> &[String] {
        &self.derived.label_names
    }

    /// 数值列名（声明顺序）
    pub fn value_names(&self) -> &[String] {
        &self.derived.value_names
    }

    /// 输出用的标签名（优先使用 rename）
    pub fn label_list(&self) -> Vec<String> {
        self.derived
            .label_names
            .iter()
            .filter_map(|name| self.column(name))
            .map(|column| column.output_name().to_string())
            .collect()
    }

    /// 指标族级别的超时时长，`None` 表示不限时
    pub fn timeout_duration(&self) -> Option<Duration> {
        let secs = normalise_timeout(self.timeout);
        if secs > 0.0 { Some(Duration::from_secs_f64(secs)) } else { None }
    }

    /// 指标族级别的缓存有效期（秒）
    pub fn ttl_secs(&self) -> f64 {
        normalise_ttl(self.ttl)
    }

    /// 以 `name: definition` 形式序列化为 YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let mut wrapper = BTreeMap::new();
        wrapper.insert(self.name.clone(), self);
        serde_yaml::to_string(&wrapper).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }
}
