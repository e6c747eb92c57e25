//! Sync trigger client — start a downstream sync job and ask for its status.
//!
//! Raw status strings from the job API are normalized into the closed
//! [`JobState`] set as soon as they cross this boundary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use syncwatch_core::{
    types::{ConnectionId, JobHandle},
    JobApiSettings,
};

use crate::error::TriggerError;

// ---------------------------------------------------------------------------
// Status vocabulary
// ---------------------------------------------------------------------------

/// Normalized job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    NotFound,
}

impl JobState {
    /// Map a raw job API status onto the closed set.
    ///
    /// Policy: anything not listed here, including the API's `incomplete`
    /// (an attempt failed and the job will retry), is `Running`. An unknown
    /// status must never finalize a job.
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "not_found" => Self::NotFound,
            _ => Self::Running,
        }
    }

    /// Failed, cancelled or vanished: the handle is dropped, the watermark kept.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::NotFound)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Succeeded || self.is_failure()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a status lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// When the job last changed; for a succeeded job, its completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Status string as reported, lower-cased.
    pub raw_status: String,
    /// Informational only.
    pub duration: Option<String>,
    /// Informational only.
    pub rows_synced: Option<u64>,
}

impl JobStatus {
    pub fn new(state: JobState, completed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            state,
            completed_at,
            raw_status: state.as_str().to_string(),
            duration: None,
            rows_synced: None,
        }
    }

    pub fn not_found() -> Self {
        Self::new(JobState::NotFound, None)
    }
}

// ---------------------------------------------------------------------------
// Client seam
// ---------------------------------------------------------------------------

/// The external job-execution system.
#[async_trait]
pub trait SyncTrigger: Send + Sync {
    /// Start a sync job for `connection` and return its handle.
    async fn start(&self, connection: &ConnectionId) -> Result<JobHandle, TriggerError>;

    /// Current status of `handle`. An unknown job is `Ok` with
    /// [`JobState::NotFound`], not an error.
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, TriggerError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// JSON-over-HTTP job API client.
///
/// One `ureq::Agent` (connection pool included) is shared by every call for
/// the life of the process. Requests are blocking and run on tokio's blocking
/// pool.
#[derive(Clone)]
pub struct HttpSyncTrigger {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpSyncTrigger {
    pub fn new(settings: &JobApiSettings) -> Self {
        Self::with_timeout(&settings.base_url, settings.timeout)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }

    fn job_url(&self, handle: &JobHandle) -> String {
        format!("{}/jobs/{}", self.base_url, handle.as_str())
    }
}

#[async_trait]
impl SyncTrigger for HttpSyncTrigger {
    async fn start(&self, connection: &ConnectionId) -> Result<JobHandle, TriggerError> {
        let agent = self.agent.clone();
        let url = self.jobs_url();
        let payload = json!({ "connectionId": connection.as_str(), "jobType": "sync" });
        let body = blocking(move || {
            let response = agent
                .post(&url)
                .set("Accept", "application/json")
                .send_json(payload);
            read_json(response)
        })
        .await?;
        parse_start_response(&body)
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, TriggerError> {
        let agent = self.agent.clone();
        let url = self.job_url(handle);
        let result = blocking(move || {
            let response = agent.get(&url).set("Accept", "application/json").call();
            read_json(response)
        })
        .await;
        match result {
            Ok(body) => parse_status_response(&body),
            Err(TriggerError::Http { status: 404, .. }) => {
                tracing::warn!(job = %handle, "job not found in job API");
                Ok(JobStatus::not_found())
            }
            Err(err) => Err(err),
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, TriggerError>
where
    F: FnOnce() -> Result<T, TriggerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| TriggerError::Transport(format!("job API task join error: {err}")))?
}

fn read_json(response: Result<ureq::Response, ureq::Error>) -> Result<Value, TriggerError> {
    match response {
        Ok(response) => response
            .into_json::<Value>()
            .map_err(|e| TriggerError::Decode(e.to_string())),
        Err(ureq::Error::Status(status, response)) => Err(TriggerError::Http {
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => {
            Err(TriggerError::Transport(transport.to_string()))
        }
    }
}

/// Job id from `{"job": {"jobId": …}}` or `{"jobId": …}`; string or number.
pub(crate) fn parse_start_response(body: &Value) -> Result<JobHandle, TriggerError> {
    let id = body
        .pointer("/job/jobId")
        .or_else(|| body.get("jobId"))
        .and_then(id_text);
    id.map(JobHandle::from).ok_or_else(|| TriggerError::MissingJobId {
        body: body.to_string(),
    })
}

/// Status from `{"job": {…}}` or the root object. Timestamps are Unix seconds.
pub(crate) fn parse_status_response(body: &Value) -> Result<JobStatus, TriggerError> {
    let job = body.get("job").filter(|job| job.is_object()).unwrap_or(body);
    if !job.is_object() {
        return Err(TriggerError::Decode(format!(
            "expected a job object, got: {body}"
        )));
    }

    let raw_status = job
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    Ok(JobStatus {
        state: JobState::classify(&raw_status),
        completed_at: job.get("updatedAt").and_then(unix_seconds),
        raw_status,
        duration: job.get("duration").and_then(id_text),
        rows_synced: job.get("rowsSynced").and_then(Value::as_u64),
    })
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unix_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.trunc() as i64))?;
    Utc.timestamp_opt(secs, 0).single()
}
