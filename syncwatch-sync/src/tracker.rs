//! Job lifecycle tracker for a single connection.
//!
//! State is re-derived on every pass from the persisted maps plus a live
//! status query; nothing is cached between passes.
//!
//! ```text
//!            handle recorded?
//!         no /            \ yes
//!        Idle           Checking ── status ──┬─ succeeded ─> advance watermark, clear handle ─> Idle
//!         │                                   ├─ failed / cancelled / not_found ─> clear handle ─> Idle
//!         │                                   ├─ pending / running ─> persist, stop
//!         │                                   └─ query error ─> persist unchanged, stop
//!     detect changes ── needs sync? ── start job ── ok ─> record handle
//!                                               └─ err ─> stay Idle (retried next cycle)
//! ```

use std::sync::Arc;

use chrono::Utc;

use syncwatch_core::types::{ConnectionConfig, ConnectionId, JobHandle};

use crate::detector::{self, ChangeSource};
use crate::error::SyncError;
use crate::state_store::{OrchestratorState, StateStore};
use crate::trigger::{JobState, SyncTrigger};

/// Explicit dependencies of a cycle; shared by every connection.
#[derive(Clone)]
pub struct CycleContext {
    pub store: Arc<dyn StateStore>,
    pub changes: Arc<dyn ChangeSource>,
    pub trigger: Arc<dyn SyncTrigger>,
}

impl CycleContext {
    pub fn new(
        store: Arc<dyn StateStore>,
        changes: Arc<dyn ChangeSource>,
        trigger: Arc<dyn SyncTrigger>,
    ) -> Self {
        Self {
            store,
            changes,
            trigger,
        }
    }
}

/// What the pass ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A job is still pending or running; nothing else was done.
    Waiting(JobHandle),
    /// The status query failed; state left as it was.
    StatusUnavailable(JobHandle),
    /// A new job was started.
    Triggered(JobHandle),
    /// Changes were found but the job could not be started.
    TriggerFailed(String),
    /// Idle with nothing new to sync.
    NoChanges,
    /// Idle with no monitored tables.
    NoTables,
}

/// Summary of one connection's pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub connection_id: ConnectionId,
    /// Terminal state of a previously recorded job resolved in this pass.
    pub resolved: Option<JobState>,
    pub action: Action,
}

/// Run one pass for `connection`: resolve an outstanding job, detect
/// changes, maybe trigger, then persist both maps.
///
/// Only state-store failures are returned; job-API and table errors are
/// logged and recovered.
pub async fn process_connection(
    ctx: &CycleContext,
    connection: &ConnectionConfig,
) -> Result<ConnectionReport, SyncError> {
    let id = &connection.connection_id;
    tracing::info!(connection = %id, description = %connection.label(), "processing connection");

    let mut state = ctx.store.load()?;
    let mut resolved = None;

    if let Some(handle) = state.active_job(id).cloned() {
        match check_job(ctx, &mut state, id, &handle).await {
            JobCheck::Resolved(job_state) => resolved = Some(job_state),
            JobCheck::Outstanding(action) => {
                ctx.store.save(&state)?;
                return Ok(ConnectionReport {
                    connection_id: id.clone(),
                    resolved: None,
                    action,
                });
            }
        }
    }

    let detection = detector::detect(ctx.changes.as_ref(), connection, state.watermark(id)).await;
    let action = if detection.needs_sync {
        start_job(ctx, &mut state, id).await
    } else if connection.monitored_tables.is_empty() {
        Action::NoTables
    } else {
        tracing::info!(connection = %id, "no new data detected; no sync triggered");
        Action::NoChanges
    };

    ctx.store.save(&state)?;
    tracing::info!(connection = %id, action = ?action, "finished processing connection");
    Ok(ConnectionReport {
        connection_id: id.clone(),
        resolved,
        action,
    })
}

enum JobCheck {
    /// The job reached a terminal state and the handle was cleared.
    Resolved(JobState),
    /// The handle stays; this pass ends here.
    Outstanding(Action),
}

async fn check_job(
    ctx: &CycleContext,
    state: &mut OrchestratorState,
    id: &ConnectionId,
    handle: &JobHandle,
) -> JobCheck {
    tracing::info!(connection = %id, job = %handle, "found active job; checking status");

    // Status is read here, right before its timestamp is used, never reused
    // from an earlier read.
    let status = match ctx.trigger.status(handle).await {
        Ok(status) => status,
        Err(err) => {
            tracing::error!(
                connection = %id,
                job = %handle,
                error = %err,
                "job status check failed; will retry next cycle",
            );
            return JobCheck::Outstanding(Action::StatusUnavailable(handle.clone()));
        }
    };

    match status.state {
        JobState::Succeeded => {
            let completed_at = status.completed_at.unwrap_or_else(Utc::now);
            let watermark = state.advance_watermark(id, completed_at);
            state.clear_active_job(id);
            tracing::info!(
                connection = %id,
                job = %handle,
                watermark = %watermark.to_rfc3339(),
                rows_synced = ?status.rows_synced,
                "job succeeded; watermark advanced",
            );
            JobCheck::Resolved(JobState::Succeeded)
        }
        job_state if job_state.is_failure() => {
            state.clear_active_job(id);
            tracing::error!(
                connection = %id,
                job = %handle,
                status = %job_state,
                "job did not succeed; watermark unchanged, data will be retried",
            );
            JobCheck::Resolved(job_state)
        }
        job_state => {
            tracing::info!(
                connection = %id,
                job = %handle,
                status = %job_state,
                raw_status = %status.raw_status,
                "job still in progress; will check again next cycle",
            );
            JobCheck::Outstanding(Action::Waiting(handle.clone()))
        }
    }
}

async fn start_job(ctx: &CycleContext, state: &mut OrchestratorState, id: &ConnectionId) -> Action {
    // A handle here would mean two jobs in flight.
    if let Some(handle) = state.active_job(id) {
        return Action::Waiting(handle.clone());
    }

    tracing::info!(connection = %id, "new data detected; triggering sync");
    match ctx.trigger.start(id).await {
        Ok(handle) => {
            tracing::info!(connection = %id, job = %handle, "sync triggered");
            state.set_active_job(id, handle.clone());
            Action::Triggered(handle)
        }
        Err(err) => {
            tracing::error!(connection = %id, error = %err, "failed to trigger sync");
            Action::TriggerFailed(err.to_string())
        }
    }
}
