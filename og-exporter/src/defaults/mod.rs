// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 内置查询定义
//!
//! 每次调用都返回一份新的映射，合并用户定义不会影响内置表

use crate::config::parse_query_config;
use crate::query::QueryMap;

const DEFAULT_QUERIES: &str = include_str!("default_queries.yaml");

/// 内置查询定义的来源标识
pub const DEFAULT_QUERIES_PATH: &str = "<builtin>";

/// 返回一份已校验的内置查询定义
pub fn default_queries() -> QueryMap {
    parse_query_config(DEFAULT_QUERIES, DEFAULT_QUERIES_PATH).expect("built-in query definitions are valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ColumnUsage;
    use crate::version::Version;

    /// TEST-U-1501: 内置定义完整性测试
    #[test]
    fn test_default_queries() {
        let queries = default_queries();

        let keys: Vec<_> = queries.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "pg_bgwriter",
                "pg_database",
                "pg_lock",
                "pg_stat_activity",
                "pg_stat_database",
                "pg_stat_database_conflicts",
                "pg_stat_replication",
            ]
        );
        assert!(queries.values().all(|q| q.is_checked() && q.is_enabled() && q.public));
        assert_eq!(queries["pg_bgwriter"].name, "pg_stat_bgwriter");
        assert_eq!(
            queries["pg_lock"].label_names(),
            &["datname".to_string(), "mode".to_string()]
        );
        assert_eq!(
            queries["pg_stat_database"].column("xact_commit").map(|c| c.kind()),
            Some(ColumnUsage::Counter)
        );
    }

    /// TEST-U-1502: 内置定义版本适用性测试
    #[test]
    fn test_default_queries_version_gates() {
        let queries = default_queries();
        let unknown = Version::default();

        assert!(queries["pg_lock"].select_variant(&unknown, true).is_some());
        assert!(queries["pg_stat_activity"].select_variant(&unknown, true).is_none());
        assert!(
            queries["pg_stat_activity"]
                .select_variant(&Version::new(1, 1, 0), false)
                .is_some()
        );
    }

    /// TEST-U-1503: 每次返回独立副本测试
    #[test]
    fn test_default_queries_fresh_copy() {
        let mut first = default_queries();
        first.remove("pg_lock");

        assert!(default_queries().contains_key("pg_lock"));
    }
}
