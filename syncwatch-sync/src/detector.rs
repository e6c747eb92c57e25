//! Change detection by watermark comparison.
//!
//! One aggregate query per monitored table per cycle:
//!
//! ```sql
//! SELECT MAX("updated_at") AS max_updated_at FROM "schema"."table"
//! ```
//!
//! A connection needs a sync iff at least one table reports a max value and
//! either the connection has never synced or that value is newer than the
//! watermark. A failing table is logged and left out; it never hides a
//! change seen in another table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use syncwatch_core::{
    types::{ConnectionConfig, MonitoredTable},
    ConfigError, DbSettings,
};

use crate::error::DetectError;

const MAX_COLUMN_ALIAS: &str = "max_updated_at";
const POOL_MAX_CONNECTIONS: u32 = 4;
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the max change-tracking value of a table comes from.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// `None` when the table is empty or the column is entirely null.
    async fn max_change_value(
        &self,
        table: &MonitoredTable,
    ) -> Result<Option<DateTime<Utc>>, DetectError>;
}

/// Outcome of checking every monitored table of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub needs_sync: bool,
    /// Newest change value among the tables that are ahead of the watermark.
    pub newest_change: Option<DateTime<Utc>>,
    /// `schema.table` of each table ahead of the watermark.
    pub changed_tables: Vec<String>,
    /// `schema.table` of each table whose query failed this cycle.
    pub failed_tables: Vec<String>,
}

/// Compare every monitored table of `connection` against `last_synced`.
pub async fn detect(
    source: &dyn ChangeSource,
    connection: &ConnectionConfig,
    last_synced: Option<DateTime<Utc>>,
) -> Detection {
    let mut detection = Detection::default();
    let id = &connection.connection_id;

    if connection.monitored_tables.is_empty() {
        tracing::warn!(connection = %id, "no tables configured for monitoring; skipping data check");
        return detection;
    }

    tracing::debug!(
        connection = %id,
        last_synced = %last_synced.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string()),
        "checking monitored tables",
    );

    for table in &connection.monitored_tables {
        let qualified = table.qualified_name();
        let max = match source.max_change_value(table).await {
            Ok(max) => max,
            Err(err) => {
                tracing::error!(
                    connection = %id,
                    table = %qualified,
                    column = %table.updated_at_column,
                    error = %err,
                    "could not read change column; skipping table this cycle",
                );
                detection.failed_tables.push(qualified);
                continue;
            }
        };

        let Some(max) = max else {
            tracing::debug!(connection = %id, table = %qualified, "table has no change values");
            continue;
        };
        tracing::debug!(connection = %id, table = %qualified, max = %max.to_rfc3339(), "max change value");

        if is_newer(max, last_synced) {
            tracing::info!(
                connection = %id,
                table = %qualified,
                max = %max.to_rfc3339(),
                "new data detected since last sync",
            );
            detection.needs_sync = true;
            detection.changed_tables.push(qualified);
            if detection.newest_change.map_or(true, |newest| max > newest) {
                detection.newest_change = Some(max);
            }
        }
    }

    detection
}

/// The decision rule for a single table.
pub fn is_newer(max: DateTime<Utc>, last_synced: Option<DateTime<Utc>>) -> bool {
    match last_synced {
        None => true,
        Some(watermark) => max > watermark,
    }
}

// ---------------------------------------------------------------------------
// Postgres source
// ---------------------------------------------------------------------------

/// Source database reached through a process-wide `sqlx` pool.
#[derive(Debug, Clone)]
pub struct PgChangeSource {
    pool: PgPool,
}

impl PgChangeSource {
    /// Build the pool without connecting; the first query opens a connection.
    ///
    /// Fails only when the database host is not configured.
    pub fn connect_lazy(db: &DbSettings) -> Result<Self, ConfigError> {
        let mut options = PgConnectOptions::new()
            .host(db.require_host()?)
            .port(db.port);
        if let Some(user) = db.user.as_deref() {
            options = options.username(user);
        }
        if let Some(password) = db.password.as_deref() {
            options = options.password(password);
        }
        if let Some(database) = db.database.as_deref() {
            options = options.database(database);
        }

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);
        tracing::info!(host = ?db.host, port = db.port, "source database pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Close every pooled connection. Used at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("source database pool closed");
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn max_change_value(
        &self,
        table: &MonitoredTable,
    ) -> Result<Option<DateTime<Utc>>, DetectError> {
        let sql = max_change_query(table);
        tracing::debug!(table = %table.qualified_name(), %sql, "querying max change value");
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| match source {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                    DetectError::Connect(source)
                }
                source => DetectError::Query {
                    table: table.qualified_name(),
                    source,
                },
            })?;
        decode_max(&row, table)
    }
}

/// `SELECT MAX("col") AS max_updated_at FROM "schema"."table"` with quoted identifiers.
pub fn max_change_query(table: &MonitoredTable) -> String {
    format!(
        "SELECT MAX({}) AS {MAX_COLUMN_ALIAS} FROM {}.{}",
        quote_ident(&table.updated_at_column),
        quote_ident(&table.schema_name),
        quote_ident(&table.table_name),
    )
}

/// Postgres identifier quoting: wrap in `"` and double any embedded `"`.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `timestamptz` as is, `timestamp` read as UTC, `date` as midnight UTC.
fn decode_max(row: &PgRow, table: &MonitoredTable) -> Result<Option<DateTime<Utc>>, DetectError> {
    if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(MAX_COLUMN_ALIAS) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(MAX_COLUMN_ALIAS) {
        return Ok(value.map(|naive| naive.and_utc()));
    }
    match row.try_get::<Option<NaiveDate>, _>(MAX_COLUMN_ALIAS) {
        Ok(value) => Ok(value
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())),
        Err(err) => Err(DetectError::Decode {
            table: table.qualified_name(),
            reason: format!(
                "column {} is not a timestamp, timestamptz or date: {err}",
                table.updated_at_column
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_quotes_every_identifier() {
        let table = MonitoredTable::new("sales", "order items", "updated_at");
        assert_eq!(
            max_change_query(&table),
            r#"SELECT MAX("updated_at") AS max_updated_at FROM "sales"."order items""#
        );
    }

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn never_synced_means_any_value_is_newer() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(is_newer(at, None));
    }

    #[test]
    fn equal_to_watermark_is_not_newer() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        assert!(!is_newer(at, Some(at)));
        assert!(is_newer(at + chrono::Duration::seconds(1), Some(at)));
    }
}
