//! Tick schedule and the single-cycle guard.
//!
//! Schedules are written in classic 5-field cron (`min hour dom month dow`)
//! or in the 6/7-field syntax of the `cron` crate (leading seconds, optional
//! trailing year). A 5-field expression gets a `0` seconds field, and its
//! numeric day-of-week values are shifted from `0-7` (Sunday = 0 or 7) to the
//! crate's `1-7` (Sunday = 1).

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;

use syncwatch_core::ConfigError;

/// A parsed periodic tick source.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    expr: String,
    schedule: Schedule,
}

impl TickSchedule {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let normalized = normalize(expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidSchedule {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First tick strictly after `now`, if the schedule has any left.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

fn normalize(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        shift_day_of_week(fields[4])
    )
}

/// `0-7` → `1-7` for every numeric item of a day-of-week field; names,
/// wildcards and step values are left alone.
fn shift_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let bounds = range
                .split_once('-')
                .and_then(|(lo, hi)| Some((lo.parse::<u8>().ok()?, hi.parse::<u8>().ok()?)));
            match bounds {
                Some((lo, hi)) => shift_day_range(lo, hi, step),
                None => {
                    let shifted = match range.parse::<u8>() {
                        Ok(day) => shift_day(day).to_string(),
                        Err(_) => range.to_string(),
                    };
                    match step {
                        Some(step) => format!("{shifted}/{step}"),
                        None => shifted,
                    }
                }
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_day(day: u8) -> u8 {
    (day % 7) + 1
}

/// A range ending on Sunday as `7` would wrap to `1`, so the Sunday end is
/// split off: `5-7` → `6-7,1`.
fn shift_day_range(lo: u8, hi: u8, step: Option<&str>) -> String {
    let with_step = |range: String| match step {
        Some(step) => format!("{range}/{step}"),
        None => range,
    };
    if hi != 7 || lo > 6 {
        return with_step(format!("{}-{}", shift_day(lo), shift_day(hi)));
    }
    if lo == 0 {
        return with_step("1-7".to_string());
    }

    let every = step.and_then(|step| step.parse::<u8>().ok()).unwrap_or(1).max(1);
    let mut shifted = with_step(format!("{}-7", lo + 1));
    if (7 - lo) % every == 0 {
        shifted.push_str(",1");
    }
    shifted
}

/// Single-slot running flag: at most one cycle holds the permit at a time.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    running: Arc<AtomicBool>,
}

impl CycleGuard {
    /// `None` while another cycle is running.
    pub fn try_acquire(&self) -> Option<CyclePermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held for the duration of one cycle; releases the guard on drop.
#[derive(Debug)]
pub struct CyclePermit {
    running: Arc<AtomicBool>,
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
