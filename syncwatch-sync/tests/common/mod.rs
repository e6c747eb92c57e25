//! Fakes shared by the integration tests: a scripted change source and a
//! scripted job API that records every call.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use syncwatch_core::types::{ConnectionConfig, ConnectionId, JobHandle, MonitoredTable};
use syncwatch_sync::{
    ChangeSource, CycleContext, DetectError, JobState, JobStatus, MemoryStateStore,
    OrchestratorState, StateStore, StoreError, SyncTrigger, TriggerError,
};

pub fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

pub fn connection(id: &str, tables: &[&str]) -> ConnectionConfig {
    ConnectionConfig {
        connection_id: ConnectionId::from(id),
        description: format!("{id} test connection"),
        monitored_tables: tables
            .iter()
            .map(|t| MonitoredTable::new("public", *t, "updated_at"))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Change source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeChanges {
    tables: Mutex<HashMap<String, Result<Option<DateTime<Utc>>, String>>>,
    queries: Mutex<Vec<String>>,
}

impl FakeChanges {
    pub fn set(&self, table: &str, max: Option<DateTime<Utc>>) {
        self.tables
            .lock()
            .unwrap()
            .insert(format!("public.{table}"), Ok(max));
    }

    pub fn fail(&self, table: &str, reason: &str) {
        self.tables
            .lock()
            .unwrap()
            .insert(format!("public.{table}"), Err(reason.to_string()));
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeSource for FakeChanges {
    async fn max_change_value(
        &self,
        table: &MonitoredTable,
    ) -> Result<Option<DateTime<Utc>>, DetectError> {
        let name = table.qualified_name();
        self.queries.lock().unwrap().push(name.clone());
        match self.tables.lock().unwrap().get(&name).cloned() {
            Some(Ok(max)) => Ok(max),
            Some(Err(reason)) => Err(DetectError::Decode {
                table: name,
                reason,
            }),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Job API
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTrigger {
    next_ids: Mutex<VecDeque<Result<JobHandle, String>>>,
    statuses: Mutex<HashMap<JobHandle, Result<JobStatus, String>>>,
    starts: Mutex<Vec<ConnectionId>>,
    status_calls: Mutex<Vec<JobHandle>>,
    /// Jobs started here and not yet reported terminal.
    outstanding: Mutex<HashMap<ConnectionId, JobHandle>>,
    /// Starts issued while the connection still had an outstanding job.
    violations: Mutex<Vec<ConnectionId>>,
}

impl FakeTrigger {
    pub fn queue_start(&self, handle: &str) {
        self.next_ids
            .lock()
            .unwrap()
            .push_back(Ok(JobHandle::from(handle)));
    }

    pub fn queue_start_failure(&self, reason: &str) {
        self.next_ids
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
    }

    pub fn set_status(&self, handle: &str, state: JobState, completed_at: Option<DateTime<Utc>>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(JobHandle::from(handle), Ok(JobStatus::new(state, completed_at)));
    }

    pub fn fail_status(&self, handle: &str, reason: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(JobHandle::from(handle), Err(reason.to_string()));
    }

    pub fn starts(&self) -> Vec<ConnectionId> {
        self.starts.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<JobHandle> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn violations(&self) -> Vec<ConnectionId> {
        self.violations.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncTrigger for FakeTrigger {
    async fn start(&self, connection: &ConnectionId) -> Result<JobHandle, TriggerError> {
        if self.outstanding.lock().unwrap().contains_key(connection) {
            self.violations.lock().unwrap().push(connection.clone());
        }
        self.starts.lock().unwrap().push(connection.clone());
        let next = self.next_ids.lock().unwrap().pop_front();
        let handle = match next {
            Some(Ok(handle)) => handle,
            Some(Err(reason)) => return Err(TriggerError::Transport(reason)),
            None => JobHandle::from(format!("job-{}", self.starts().len())),
        };
        self.outstanding
            .lock()
            .unwrap()
            .insert(connection.clone(), handle.clone());
        Ok(handle)
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, TriggerError> {
        self.status_calls.lock().unwrap().push(handle.clone());
        let scripted = self.statuses.lock().unwrap().get(handle).cloned();
        match scripted {
            Some(Ok(status)) => {
                if status.state.is_terminal() {
                    self.outstanding
                        .lock()
                        .unwrap()
                        .retain(|_, outstanding| *outstanding != *handle);
                }
                Ok(status)
            }
            Some(Err(reason)) => Err(TriggerError::Http {
                status: 503,
                body: reason,
            }),
            None => Ok(JobStatus::new(JobState::Running, None)),
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStateStore>,
    pub changes: Arc<FakeChanges>,
    pub trigger: Arc<FakeTrigger>,
    pub ctx: CycleContext,
}

impl Harness {
    pub fn new(initial: OrchestratorState) -> Self {
        let store = Arc::new(MemoryStateStore::new(initial));
        let changes = Arc::new(FakeChanges::default());
        let trigger = Arc::new(FakeTrigger::default());
        let ctx = CycleContext::new(store.clone(), changes.clone(), trigger.clone());
        Self {
            store,
            changes,
            trigger,
            ctx,
        }
    }
}

/// Store whose `save` fails on the listed call numbers (1-based).
pub struct FlakyStore {
    pub inner: MemoryStateStore,
    fail_on: Vec<usize>,
    calls: Mutex<usize>,
}

impl FlakyStore {
    pub fn new(fail_on: Vec<usize>) -> Self {
        Self {
            inner: MemoryStateStore::default(),
            fail_on,
            calls: Mutex::new(0),
        }
    }
}

impl StateStore for FlakyStore {
    fn load(&self) -> Result<OrchestratorState, StoreError> {
        self.inner.load()
    }

    fn save(&self, state: &OrchestratorState) -> Result<(), StoreError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if self.fail_on.contains(&*calls) {
            return Err(StoreError::Io {
                path: "state/active_jobs.json".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(state)
    }
}
