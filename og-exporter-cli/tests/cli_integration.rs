// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 命令行集成测试

use assert_cmd::Command;
use predicates::prelude::*;

fn og_exporter() -> Command {
    let mut cmd = Command::cargo_bin("og_exporter").expect("binary built");
    cmd.env_remove("OG_EXPORTER_URL")
        .env_remove("OG_EXPORTER_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

/// TEST-I-301: 帮助信息
#[test]
fn test_help() {
    og_exporter()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--web.listen-address"))
        .stdout(predicate::str::contains("--dry-run"));
}

/// TEST-I-302: dry-run 输出合并后的查询定义
#[test]
fn test_dry_run_prints_queries() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(
        dir.path().join("custom.yaml"),
        r#"
pg_custom:
  query:
    - sql: "SELECT 1 AS value"
  metrics:
    - name: value
      usage: GAUGE
"#,
    )
    .expect("write config");

    og_exporter()
        .args(["--dry-run", "--log-level", "error", "--url", "host=db1 port=5432"])
        .arg("--config")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("pg_lock:"))
        .stdout(predicate::str::contains("pg_custom:"));
}

/// TEST-I-303: 非法查询定义导致启动失败
#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let file = dir.path().join("broken.yaml");
    std::fs::write(&file, "pg_broken:\n  metrics:\n    - name: x\n      usage: SOMETHING\n").expect("write config");

    og_exporter()
        .args(["--dry-run", "--log-level", "error", "--url", "host=db1"])
        .arg("--config")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported usage"));
}
