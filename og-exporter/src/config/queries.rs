// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 查询定义文件加载与合并
//!
//! 支持单个 YAML 文件或一层目录；目录下的文件按字母序加载，后加载的定义覆盖先加载的

use std::path::Path;

use super::ConfigError;
use crate::query::QueryMap;

/// 解析查询定义内容
///
/// 名称为空时使用映射键，记录来源路径，并对每个定义执行校验
///
/// # Errors
///
/// YAML 格式错误或任一定义校验失败时返回错误
pub fn parse_query_config(content: &str, path: &str) -> Result<QueryMap, ConfigError> {
    let mut queries: QueryMap =
        serde_yaml::from_str(content).map_err(|e| ConfigError::InvalidFormat(format!("malformed config: {}", e)))?;

    for (name, query) in queries.iter_mut() {
        query.path = path.to_string();
        if query.name.is_empty() {
            query.name = name.clone();
        }
        query.check()?;
    }

    Ok(queries)
}

fn is_yaml_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// 加载查询定义文件或目录
///
/// 目录模式下，未显式设置优先级的定义使用 `100 + 文件序号`；
/// 无法解析的文件会被跳过并记录警告
///
/// # Errors
///
/// 路径不存在、读取失败或单文件解析失败时返回错误
pub fn load_query_config(path: impl AsRef<Path>) -> Result<QueryMap, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        let content = std::fs::read_to_string(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let queries = parse_query_config(&content, &file_name)?;
        tracing::debug!("Loaded {} queries from {}", queries.len(), path.display());
        return Ok(queries);
    }

    tracing::debug!("Loading query config from dir: {}", path.display());
    let mut files: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_yaml_file(p))
        .collect();
    files.sort();

    let mut queries = QueryMap::new();
    let mut query_count = 0usize;
    let mut config_count = 0i32;
    for file in &files {
        match load_query_config(file) {
            Ok(single) => {
                config_count += 1;
                for (name, mut query) in single {
                    query_count += 1;
                    if query.priority == 0 {
                        query.priority = 100 + config_count;
                    }
                    queries.insert(name, query);
                }
            }
            Err(e) => {
                tracing::warn!("Skip config {} due to error: {}", file.display(), e);
            }
        }
    }

    tracing::debug!(
        "Loaded {} of {} queries from {} config files",
        queries.len(),
        query_count,
        config_count
    );
    Ok(queries)
}

/// 合并默认定义与用户定义，返回新的映射
///
/// 用户定义按名称（不区分大小写）替换同名默认定义，保留默认定义的键；
/// 没有对应默认定义的用户定义直接加入。两个输入都不会被修改
pub fn merge_queries(base: &QueryMap, overrides: &QueryMap) -> QueryMap {
    let mut merged = base.clone();

    for (key, query) in overrides {
        let target_key = base
            .iter()
            .find(|(_, default)| default.name.eq_ignore_ascii_case(&query.name))
            .map(|(default_key, _)| default_key.clone())
            .unwrap_or_else(|| key.clone());
        merged.insert(target_key, query.clone());
    }

    merged
}

/// 过滤出非公共的定义
///
/// 自动发现模式下，同一实例的后续数据库只采集这些定义
pub fn private_queries(queries: &QueryMap) -> QueryMap {
    queries
        .iter()
        .filter(|(_, query)| !query.public)
        .map(|(name, query)| (name.clone(), query.clone()))
        .collect()
}
