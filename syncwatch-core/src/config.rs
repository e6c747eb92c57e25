//! Environment settings and the monitored-connections document.
//!
//! # Storage layout
//!
//! ```text
//! ~/.syncwatch/
//!   monitored_tables.json        (connection list, JSON or YAML)
//!   state/
//!     last_sync_timestamps.json  (watermarks)
//!     active_jobs.json           (in-flight job handles)
//! ```
//!
//! # API pattern
//!
//! Loaders come in two forms, like the rest of the workspace:
//! - `fn_at(path, …)`: explicit path; used in tests with `TempDir`
//! - `fn(settings)`: resolves the path from [`Settings`]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::types::{ConnectionConfig, ConnectionId, MonitoredTable};

pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_JOB_API_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_JOB_API_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCHEDULE: &str = "0 * * * *";
pub const DEFAULT_SCHEMA_NAME: &str = "public";
pub const DEFAULT_UPDATED_AT_COLUMN: &str = "updated_at";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ---------------------------------------------------------------------------
// 1. Settings
// ---------------------------------------------------------------------------

/// Source database connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl DbSettings {
    /// The host is the one parameter without a usable default.
    pub fn require_host(&self) -> Result<&str, ConfigError> {
        self.host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::MissingSetting("SOURCE_DB_HOST"))
    }
}

/// Downstream job API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobApiSettings {
    pub base_url: String,
    pub timeout: Duration,
}

/// Values used when a table entry omits its schema or change column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefaults {
    pub schema_name: String,
    pub updated_at_column: String,
}

impl Default for TableDefaults {
    fn default() -> Self {
        Self {
            schema_name: DEFAULT_SCHEMA_NAME.to_string(),
            updated_at_column: DEFAULT_UPDATED_AT_COLUMN.to_string(),
        }
    }
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source_db: DbSettings,
    pub job_api: JobApiSettings,
    /// Tick schedule expression (5-field cron or `cron` crate syntax).
    pub schedule: String,
    pub defaults: TableDefaults,
    pub state_dir: PathBuf,
    pub connections_file: PathBuf,
    pub log_level: String,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = dirs::home_dir();
        Self::from_lookup(|key| std::env::var(key).ok(), home.as_deref())
    }

    /// Build settings from an arbitrary key lookup.
    ///
    /// `home` is only needed when the state directory or connections file is
    /// not set explicitly.
    pub fn from_lookup<F>(lookup: F, home: Option<&Path>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("SOURCE_DB_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "unparsable SOURCE_DB_PORT, using {DEFAULT_DB_PORT}");
                DEFAULT_DB_PORT
            }),
            None => DEFAULT_DB_PORT,
        };

        let timeout_secs = get("SYNC_API_TIMEOUT_SECS")
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_JOB_API_TIMEOUT_SECS);

        let syncwatch_root = || -> Result<PathBuf, ConfigError> {
            home.map(|h| h.join(".syncwatch"))
                .ok_or(ConfigError::HomeNotFound)
        };

        let state_dir = match get("SYNCWATCH_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => syncwatch_root()?.join("state"),
        };
        let connections_file = match get("SYNCWATCH_CONNECTIONS_FILE") {
            Some(file) => PathBuf::from(file),
            None => syncwatch_root()?.join("monitored_tables.json"),
        };

        Ok(Self {
            source_db: DbSettings {
                host: get("SOURCE_DB_HOST"),
                port,
                user: get("SOURCE_DB_USER"),
                password: get("SOURCE_DB_PASSWORD"),
                database: get("SOURCE_DB_NAME"),
            },
            job_api: JobApiSettings {
                base_url: get("SYNC_API_URL")
                    .or_else(|| get("AIRBYTE_API_URL"))
                    .unwrap_or_else(|| DEFAULT_JOB_API_URL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            schedule: get("SYNCWATCH_CRON_SCHEDULE")
                .or_else(|| get("ORCHESTRATOR_CRON_SCHEDULE"))
                .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            defaults: TableDefaults {
                schema_name: get("DEFAULT_SCHEMA_NAME")
                    .unwrap_or_else(|| DEFAULT_SCHEMA_NAME.to_string()),
                updated_at_column: get("DEFAULT_UPDATED_AT_COLUMN")
                    .unwrap_or_else(|| DEFAULT_UPDATED_AT_COLUMN.to_string()),
            },
            state_dir,
            connections_file,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// 2. Connection document
// ---------------------------------------------------------------------------

/// On-disk shape of one connection entry. Everything is optional here so
/// that invalid entries can be reported and skipped instead of failing the
/// whole document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionEntry {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    monitored_tables: Option<Vec<TableEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    #[serde(default)]
    schema_name: Option<String>,
    table_name: String,
    #[serde(default)]
    updated_at_column: Option<String>,
}

impl TableEntry {
    fn resolve(self, defaults: &TableDefaults) -> MonitoredTable {
        let pick = |value: Option<String>, fallback: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        MonitoredTable {
            schema_name: pick(self.schema_name, &defaults.schema_name),
            table_name: self.table_name,
            updated_at_column: pick(self.updated_at_column, &defaults.updated_at_column),
        }
    }
}

/// Load the connection list from `path`.
///
/// A missing file is not an error: orchestration becomes a no-op. A malformed
/// document is fatal ([`ConfigError::Parse`]). Entries without a connection
/// id or without a `monitoredTables` key are skipped with a warning, as are
/// repeated ids.
pub fn load_connections_at(
    path: &Path,
    defaults: &TableDefaults,
) -> Result<Vec<ConnectionConfig>, ConfigError> {
    if !path.exists() {
        tracing::warn!(
            path = %path.display(),
            "connection config not found; no tables will be monitored",
        );
        return Ok(vec![]);
    }

    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let entries = parse_entries(path, &contents)?;

    let mut seen = HashSet::new();
    let mut connections = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Some(id) = entry.connection_id.filter(|id| !id.trim().is_empty()) else {
            tracing::warn!(index, "connection entry without connectionId; skipping");
            continue;
        };
        let Some(tables) = entry.monitored_tables else {
            tracing::warn!(connection = %id, "connection entry without monitoredTables; skipping");
            continue;
        };
        if !seen.insert(id.clone()) {
            tracing::warn!(connection = %id, "duplicate connection entry; skipping");
            continue;
        }
        connections.push(ConnectionConfig {
            connection_id: ConnectionId::from(id),
            description: entry.description.unwrap_or_default(),
            monitored_tables: tables.into_iter().map(|t| t.resolve(defaults)).collect(),
        });
    }

    if connections.is_empty() {
        tracing::warn!(path = %path.display(), "no connections configured");
    }
    Ok(connections)
}

/// `load_connections_at` using the configured connections file.
pub fn load_connections(settings: &Settings) -> Result<Vec<ConnectionConfig>, ConfigError> {
    load_connections_at(&settings.connections_file, &settings.defaults)
}

fn parse_entries(path: &Path, contents: &str) -> Result<Vec<ConnectionEntry>, ConfigError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    if is_yaml {
        // An empty YAML file deserializes to unit, not a sequence.
        if contents.trim().is_empty() {
            return Ok(vec![]);
        }
        serde_yaml::from_str(contents).map_err(|e| parse_err(e.to_string()))
    } else {
        serde_json::from_str(contents).map_err(|e| parse_err(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let home = PathBuf::from("/home/ops");
        let settings = Settings::from_lookup(lookup(&[]), Some(&home)).expect("settings");
        assert_eq!(settings.source_db.port, 5432);
        assert_eq!(settings.source_db.host, None);
        assert_eq!(settings.job_api.base_url, DEFAULT_JOB_API_URL);
        assert_eq!(settings.schedule, "0 * * * *");
        assert_eq!(settings.defaults, TableDefaults::default());
        assert_eq!(settings.state_dir, home.join(".syncwatch").join("state"));
        assert_eq!(
            settings.connections_file,
            home.join(".syncwatch").join("monitored_tables.json")
        );
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn legacy_variable_names_are_honoured() {
        let settings = Settings::from_lookup(
            lookup(&[
                ("AIRBYTE_API_URL", "http://airbyte:8001/api/v1"),
                ("ORCHESTRATOR_CRON_SCHEDULE", "*/5 * * * *"),
            ]),
            Some(Path::new("/home/ops")),
        )
        .expect("settings");
        assert_eq!(settings.job_api.base_url, "http://airbyte:8001/api/v1");
        assert_eq!(settings.schedule, "*/5 * * * *");
    }

    #[test]
    fn bad_port_falls_back_to_default() {
        let settings = Settings::from_lookup(
            lookup(&[("SOURCE_DB_PORT", "not-a-port")]),
            Some(Path::new("/home/ops")),
        )
        .expect("settings");
        assert_eq!(settings.source_db.port, DEFAULT_DB_PORT);
    }

    #[test]
    fn missing_home_is_an_error_only_without_explicit_paths() {
        let err = Settings::from_lookup(lookup(&[]), None).unwrap_err();
        assert!(matches!(err, ConfigError::HomeNotFound));

        let settings = Settings::from_lookup(
            lookup(&[
                ("SYNCWATCH_STATE_DIR", "/var/lib/syncwatch"),
                ("SYNCWATCH_CONNECTIONS_FILE", "/etc/syncwatch/tables.yaml"),
            ]),
            None,
        )
        .expect("settings");
        assert_eq!(settings.state_dir, PathBuf::from("/var/lib/syncwatch"));
    }

    #[test]
    fn require_host_rejects_blank_host() {
        let mut db = DbSettings {
            host: None,
            port: 5432,
            user: None,
            password: None,
            database: None,
        };
        assert!(matches!(
            db.require_host(),
            Err(ConfigError::MissingSetting("SOURCE_DB_HOST"))
        ));
        db.host = Some("db.internal".into());
        assert_eq!(db.require_host().expect("host"), "db.internal");
    }
}
