use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const CLEARED_VARS: &[&str] = &[
    "SOURCE_DB_HOST",
    "SOURCE_DB_PORT",
    "SOURCE_DB_USER",
    "SOURCE_DB_PASSWORD",
    "SOURCE_DB_NAME",
    "SYNC_API_URL",
    "AIRBYTE_API_URL",
    "SYNC_API_TIMEOUT_SECS",
    "SYNCWATCH_CRON_SCHEDULE",
    "ORCHESTRATOR_CRON_SCHEDULE",
    "DEFAULT_SCHEMA_NAME",
    "DEFAULT_UPDATED_AT_COLUMN",
    "SYNCWATCH_STATE_DIR",
    "SYNCWATCH_CONNECTIONS_FILE",
    "SYNCWATCH_LOG_FORMAT",
    "RUST_LOG",
    "LOG_LEVEL",
];

fn syncwatch_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_syncwatch"));
    for var in CLEARED_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

fn state_dir(home: &TempDir) -> PathBuf {
    home.path().join(".syncwatch").join("state")
}

fn write_connections(home: &TempDir, body: &str) {
    let root = home.path().join(".syncwatch");
    fs::create_dir_all(&root).expect("create config root");
    fs::write(root.join("monitored_tables.json"), body).expect("write connections");
}

fn write_state(home: &TempDir, watermarks: &str, active_jobs: &str) {
    let dir = state_dir(home);
    fs::create_dir_all(&dir).expect("create state dir");
    fs::write(dir.join("last_sync_timestamps.json"), watermarks).expect("write watermarks");
    fs::write(dir.join("active_jobs.json"), active_jobs).expect("write active jobs");
}

const TWO_CONNECTIONS: &str = r#"[
  {
    "connectionId": "orders-conn",
    "description": "Orders",
    "monitoredTables": [{ "tableName": "orders" }]
  },
  {
    "connectionId": "users-conn",
    "monitoredTables": [{ "schemaName": "crm", "tableName": "users", "updatedAtColumn": "modified" }]
  }
]"#;

#[test]
fn status_with_nothing_configured() {
    let home = TempDir::new().expect("home");
    syncwatch_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No connections configured."));
}

#[test]
fn status_json_reports_watermarks_and_active_jobs() {
    let home = TempDir::new().expect("home");
    write_connections(&home, TWO_CONNECTIONS);
    write_state(
        &home,
        r#"{ "orders-conn": "2024-01-01T10:00:00.000Z" }"#,
        r#"{ "users-conn": 981 }"#,
    );

    let assert = syncwatch_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let payload: serde_json::Value = serde_json::from_str(&stdout).expect("status JSON");

    let rows = payload["connections"].as_array().expect("connections array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["connection_id"], "orders-conn");
    assert_eq!(rows[0]["status"], "idle");
    assert_eq!(rows[0]["last_synced_at"], "2024-01-01T10:00:00Z");
    assert_eq!(rows[1]["connection_id"], "users-conn");
    assert_eq!(rows[1]["status"], "running");
    assert_eq!(rows[1]["active_job"], "981");
}

#[test]
fn check_config_requires_database_host() {
    let home = TempDir::new().expect("home");
    syncwatch_cmd(home.path())
        .arg("check-config")
        .assert()
        .failure()
        .stderr(contains("SOURCE_DB_HOST"));
}

#[test]
fn check_config_rejects_invalid_schedule() {
    let home = TempDir::new().expect("home");
    syncwatch_cmd(home.path())
        .arg("check-config")
        .env("SOURCE_DB_HOST", "db.internal")
        .env("SYNCWATCH_CRON_SCHEDULE", "every hour please")
        .assert()
        .failure()
        .stderr(contains("invalid schedule"));
}

#[test]
fn check_config_lists_connections_with_defaults_applied() {
    let home = TempDir::new().expect("home");
    write_connections(&home, TWO_CONNECTIONS);

    syncwatch_cmd(home.path())
        .arg("check-config")
        .env("SOURCE_DB_HOST", "db.internal")
        .env("SOURCE_DB_NAME", "app")
        .assert()
        .success()
        .stdout(contains("db.internal:5432/app"))
        .stdout(contains("connections:      2"))
        .stdout(contains("public.orders by updated_at"))
        .stdout(contains("crm.users by modified"));
}

#[test]
fn check_config_fails_on_malformed_connections_file() {
    let home = TempDir::new().expect("home");
    write_connections(&home, "[{ not json");

    syncwatch_cmd(home.path())
        .arg("check-config")
        .env("SOURCE_DB_HOST", "db.internal")
        .assert()
        .failure()
        .stderr(contains("failed to load monitored connections"));
}

#[test]
fn once_with_no_connections_is_a_clean_noop() {
    let home = TempDir::new().expect("home");
    syncwatch_cmd(home.path())
        .arg("once")
        .env("SOURCE_DB_HOST", "127.0.0.1")
        .assert()
        .success()
        .stdout(contains("0 processed, 0 failed"));

    assert!(
        !state_dir(&home).join("last_sync_timestamps.json").exists(),
        "an empty cycle must not write state"
    );
}

#[test]
fn once_refuses_to_start_when_state_is_corrupt() {
    let home = TempDir::new().expect("home");
    write_connections(&home, TWO_CONNECTIONS);
    write_state(&home, "{ definitely not json", "{}");

    syncwatch_cmd(home.path())
        .arg("once")
        .env("SOURCE_DB_HOST", "127.0.0.1")
        .assert()
        .failure()
        .stderr(contains("is corrupt"));

    let preserved = fs::read_to_string(state_dir(&home).join("last_sync_timestamps.json"))
        .expect("watermarks file");
    assert_eq!(preserved, "{ definitely not json");
}

#[test]
fn once_keeps_active_job_when_job_api_is_unreachable() {
    let home = TempDir::new().expect("home");
    write_connections(
        &home,
        r#"[{ "connectionId": "orders-conn", "monitoredTables": [] }]"#,
    );
    write_state(&home, "{}", r#"{ "orders-conn": "77" }"#);

    syncwatch_cmd(home.path())
        .arg("once")
        .env("SOURCE_DB_HOST", "127.0.0.1")
        .env("SYNC_API_URL", "http://127.0.0.1:9/api/v1")
        .env("SYNC_API_TIMEOUT_SECS", "2")
        .assert()
        .success()
        .stdout(contains("status of job 77 unavailable"))
        .stdout(contains("1 processed, 0 failed"));

    let jobs = fs::read_to_string(state_dir(&home).join("active_jobs.json")).expect("jobs file");
    let jobs: serde_json::Value = serde_json::from_str(&jobs).expect("jobs JSON");
    assert_eq!(jobs["orders-conn"], "77");
}
