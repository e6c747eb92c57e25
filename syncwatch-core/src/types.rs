//! Domain types for syncwatch.
//!
//! Identifiers are newtypes so connection ids and job handles cannot be mixed
//! up in the state maps. All types are serde-serializable; on-disk field names
//! are camelCase to match the connection config document.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of a logical source-to-destination sync pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque identifier of one execution of a downstream sync job.
///
/// The job API hands out integer ids; older state files stored them as JSON
/// numbers, so deserialization accepts either form and keeps the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "JobHandleCompat")]
pub struct JobHandle(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum JobHandleCompat {
    Text(String),
    Number(i64),
}

impl From<JobHandleCompat> for JobHandle {
    fn from(raw: JobHandleCompat) -> Self {
        match raw {
            JobHandleCompat::Text(s) => Self(s),
            JobHandleCompat::Number(n) => Self(n.to_string()),
        }
    }
}

impl JobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Connection records
// ---------------------------------------------------------------------------

/// A source table watched for new rows via its change-tracking column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredTable {
    pub schema_name: String,
    pub table_name: String,
    pub updated_at_column: String,
}

impl MonitoredTable {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        updated_at_column: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            updated_at_column: updated_at_column.into(),
        }
    }

    /// `schema.table`, for logs.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// One configured connection. Immutable for the duration of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub monitored_tables: Vec<MonitoredTable>,
}

impl ConnectionConfig {
    /// Description when present, otherwise the id.
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            self.connection_id.as_str()
        } else {
            &self.description
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
