// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 版本解析模块
//!
//! 提供三段式版本号、版本区间谓词，以及从 `SELECT version()` 输出中提取版本号

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::config::ConfigError;

/// 三段式版本号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// 主版本号
    pub major: u64,
    /// 次版本号
    pub minor: u64,
    /// 修订号
    pub patch: u64,
}

impl Version {
    /// 创建版本号
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// 宽松解析版本号
    ///
    /// 允许前导 `v`、缺省的次版本号和修订号（`2.0` 视为 `2.0.0`），
    /// 忽略 `-` 或 `+` 之后的预发布与构建信息
    ///
    /// # Errors
    ///
    /// 无法解析时返回 [`ConfigError::InvalidVersion`]
    pub fn parse_tolerant(s: &str) -> Result<Self, ConfigError> {
        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        if core.is_empty() {
            return Err(ConfigError::InvalidVersion(s.to_string()));
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(ConfigError::InvalidVersion(s.to_string()));
        }

        let mut numbers = [0u64; 3];
        for (idx, part) in parts.iter().enumerate() {
            numbers[idx] = part
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVersion(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl FromStr for Version {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_tolerant(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn version_regex() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| {
        Regex::new(r"^(\(\w+|\w+)\s+((\d+)(\.\d+)?(\.\d+)?)").expect("version pattern is a valid regex")
    })
}

/// 从数据库版本描述中提取版本号
///
/// 例如 `(openGauss 2.0.0 build 78689da9) compiled at ...` 得到 `2.0.0`，
/// `PostgreSQL 9.2.4 on x86_64-pc-linux-gnu` 得到 `9.2.4`
pub fn parse_version_string(version_string: &str) -> Option<Version> {
    let captures = version_regex().captures(version_string.trim())?;
    let matched = captures.get(2)?;
    Version::parse_tolerant(matched.as_str()).ok()
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Ne => version != &self.version,
            Op::Gt => version > &self.version,
            Op::Ge => version >= &self.version,
            Op::Lt => version < &self.version,
            Op::Le => version <= &self.version,
        }
    }
}

// 长的运算符必须排在前面
const OPERATORS: &[(&str, Op)] = &[
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("!=", Op::Ne),
    ("==", Op::Eq),
    ("≥", Op::Ge),
    ("≤", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
];

fn split_operator(token: &str) -> (Op, &str) {
    OPERATORS
        .iter()
        .find_map(|(symbol, op)| token.strip_prefix(symbol).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, token))
}

/// 版本区间谓词
///
/// 语法：`||` 分隔的若干组，组内比较条件以空白或逗号分隔且全部满足；
/// 任意一组满足即匹配。`*` 或空组匹配任意版本。
///
/// ```rust
/// use og_exporter::{Version, VersionRange};
///
/// let range: VersionRange = ">=1.0.0 <2.0.0 || >=3.0.0".parse().unwrap();
/// assert!(range.contains(&Version::new(1, 5, 0)));
/// assert!(!range.contains(&Version::new(2, 1, 0)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    groups: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// 解析版本区间
    ///
    /// # Errors
    ///
    /// 任意比较条件无法解析时返回 [`ConfigError::InvalidVersion`]
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut groups = Vec::new();

        for group in s.split("||") {
            let mut comparators = Vec::new();
            let mut pending: Option<Op> = None;

            for token in group.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
                if token == "*" {
                    continue;
                }
                let (op, rest) = match pending.take() {
                    Some(op) => (op, token),
                    None => split_operator(token),
                };
                // 运算符与版本号之间有空格，如 ">= 1.0.0"
                if rest.is_empty() {
                    pending = Some(op);
                    continue;
                }
                let version = Version::parse_tolerant(rest)
                    .map_err(|_| ConfigError::InvalidVersion(format!("malformed version range {:?}", s)))?;
                comparators.push(Comparator { op, version });
            }

            if pending.is_some() {
                return Err(ConfigError::InvalidVersion(format!(
                    "dangling operator in version range {:?}",
                    s
                )));
            }
            groups.push(comparators);
        }

        Ok(Self {
            source: s.trim().to_string(),
            groups,
        })
    }

    /// 匹配任意版本的区间
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            groups: vec![Vec::new()],
        }
    }

    /// 判断版本是否落在区间内
    pub fn contains(&self, version: &Version) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|comparator| comparator.matches(version)))
    }
}

impl FromStr for VersionRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
