//! # syncwatch-sync
//!
//! Per-connection orchestration: state store, change detection, job trigger
//! client, lifecycle tracker and cycle driver.
//!
//! Build a [`CycleContext`] from a [`StateStore`], a [`ChangeSource`] and a
//! [`SyncTrigger`], then call [`run_cycle`] once per tick.

pub mod cycle;
pub mod detector;
pub mod error;
pub mod state_store;
pub mod tracker;
pub mod trigger;

pub use cycle::{run_cycle, run_cycle_until, CycleReport, FailedConnection};
pub use detector::{ChangeSource, Detection, PgChangeSource};
pub use error::{DetectError, StoreError, SyncError, TriggerError};
pub use state_store::{FileStateStore, MemoryStateStore, OrchestratorState, StateStore};
pub use tracker::{process_connection, Action, ConnectionReport, CycleContext};
pub use trigger::{HttpSyncTrigger, JobState, JobStatus, SyncTrigger};
