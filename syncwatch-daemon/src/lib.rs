//! Scheduler runtime: periodic ticks, the single-cycle guard, signal
//! handling and tracing setup.

mod error;
pub mod schedule;
mod runtime;

pub use error::DaemonError;
pub use runtime::{init_tracing, run, run_once, run_once_blocking, start_blocking, Ticker};
pub use schedule::{CycleGuard, CyclePermit, TickSchedule};
