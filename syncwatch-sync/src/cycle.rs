//! One orchestration pass over every configured connection.
//!
//! Connections are processed strictly one at a time in configuration order.
//! A failure in one connection is logged and recorded; the rest still run.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use syncwatch_core::types::{ConnectionConfig, ConnectionId};

use crate::tracker::{process_connection, ConnectionReport, CycleContext};

/// A connection whose pass returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedConnection {
    pub connection_id: ConnectionId,
    pub error: String,
}

/// Result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: Vec<ConnectionReport>,
    pub failed: Vec<FailedConnection>,
    /// Connections not reached because shutdown was requested.
    pub skipped: Vec<ConnectionId>,
}

impl CycleReport {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            processed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// No connection failed and none were skipped.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Run one cycle over `connections`.
pub async fn run_cycle(ctx: &CycleContext, connections: &[ConnectionConfig]) -> CycleReport {
    run_cycle_until(ctx, connections, &AtomicBool::new(false)).await
}

/// Run one cycle, checking `stop` before each connection. A connection that
/// has started always finishes, so both state maps are written together.
pub async fn run_cycle_until(
    ctx: &CycleContext,
    connections: &[ConnectionConfig],
    stop: &AtomicBool,
) -> CycleReport {
    let mut report = CycleReport::begin();

    if connections.is_empty() {
        tracing::warn!("no connections configured; orchestration cycle will do nothing");
        return report;
    }

    tracing::info!(connections = connections.len(), "starting orchestration cycle");
    for (index, connection) in connections.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            report.skipped = connections[index..]
                .iter()
                .map(|c| c.connection_id.clone())
                .collect();
            tracing::warn!(
                skipped = report.skipped.len(),
                "shutdown requested; stopping cycle before remaining connections",
            );
            break;
        }

        match process_connection(ctx, connection).await {
            Ok(processed) => report.processed.push(processed),
            Err(err) => {
                tracing::error!(
                    connection = %connection.connection_id,
                    error = %err,
                    "unhandled error processing connection",
                );
                report.failed.push(FailedConnection {
                    connection_id: connection.connection_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    report.finished_at = Utc::now();
    tracing::info!(
        processed = report.processed.len(),
        failed = report.failed.len(),
        duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "orchestration cycle finished",
    );
    report
}
