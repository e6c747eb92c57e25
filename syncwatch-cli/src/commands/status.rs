//! `syncwatch status` — watermark and active-job visibility.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use syncwatch_core::{config, ConnectionConfig, ConnectionId, Settings};
use syncwatch_sync::{FileStateStore, OrchestratorState, StateStore};

/// Arguments for `syncwatch status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let connections =
            config::load_connections(settings).context("failed to load monitored connections")?;
        let store = FileStateStore::new(&settings.state_dir);
        let state = store.load().with_context(|| {
            format!("failed to read state from {}", settings.state_dir.display())
        })?;

        let rows = build_rows(&connections, &state, Utc::now());
        if self.json {
            print_json(rows)
        } else {
            print_table(settings, rows);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Phase {
    NeverSynced,
    Idle,
    Running,
    /// Present in the state files but not in the connections file.
    Unconfigured,
}

#[derive(Debug, Clone, Serialize)]
struct ConnectionStatus {
    connection_id: ConnectionId,
    description: String,
    status: Phase,
    last_synced_at: Option<DateTime<Utc>>,
    last_sync_age: String,
    active_job: Option<String>,
    monitored_tables: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "connection")]
    connection: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "active job")]
    active_job: String,
    #[tabled(rename = "tables")]
    tables: usize,
}

fn build_rows(
    connections: &[ConnectionConfig],
    state: &OrchestratorState,
    now: DateTime<Utc>,
) -> Vec<ConnectionStatus> {
    let mut rows: Vec<ConnectionStatus> = connections
        .iter()
        .map(|connection| {
            let id = &connection.connection_id;
            let active_job = state.active_job(id).map(|job| job.to_string());
            let last_synced_at = state.watermark(id);
            let status = match (&active_job, last_synced_at) {
                (Some(_), _) => Phase::Running,
                (None, Some(_)) => Phase::Idle,
                (None, None) => Phase::NeverSynced,
            };
            ConnectionStatus {
                connection_id: id.clone(),
                description: connection.description.clone(),
                status,
                last_sync_age: format_age(last_synced_at, now),
                last_synced_at,
                active_job,
                monitored_tables: connection.monitored_tables.len(),
            }
        })
        .collect();

    let configured: BTreeSet<&ConnectionId> =
        connections.iter().map(|c| &c.connection_id).collect();
    let unconfigured: BTreeSet<&ConnectionId> = state
        .watermarks
        .keys()
        .chain(state.active_jobs.keys())
        .filter(|id| !configured.contains(id))
        .collect();
    for id in unconfigured {
        let last_synced_at = state.watermark(id);
        rows.push(ConnectionStatus {
            connection_id: id.clone(),
            description: String::new(),
            status: Phase::Unconfigured,
            last_sync_age: format_age(last_synced_at, now),
            last_synced_at,
            active_job: state.active_job(id).map(|job| job.to_string()),
            monitored_tables: 0,
        });
    }
    rows
}

fn print_json(rows: Vec<ConnectionStatus>) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "connections": rows }))
            .context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(settings: &Settings, rows: Vec<ConnectionStatus>) {
    let running = rows.iter().filter(|r| r.status == Phase::Running).count();
    println!(
        "syncwatch v{} | {} connections | {} running | state: {}",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        running,
        settings.state_dir.display(),
    );

    if rows.is_empty() {
        println!("No connections configured.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            connection: if row.description.is_empty() {
                row.connection_id.to_string()
            } else {
                format!("{} ({})", row.connection_id, row.description)
            },
            status: phase_label(&row.status),
            last_sync: row.last_sync_age,
            active_job: row.active_job.unwrap_or_else(|| "-".to_string()),
            tables: row.monitored_tables,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn phase_label(phase: &Phase) -> String {
    match phase {
        Phase::NeverSynced => "NEVER SYNCED".bright_black().bold().to_string(),
        Phase::Idle => "IDLE".green().bold().to_string(),
        Phase::Running => "RUNNING".yellow().bold().to_string(),
        Phase::Unconfigured => "UNCONFIGURED".magenta().bold().to_string(),
    }
}

fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let seconds = now.signed_duration_since(at).num_seconds().max(0);
    let age = if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 60 * 60 {
        format!("{}m", seconds / 60)
    } else if seconds < 60 * 60 * 24 {
        format!("{}h", seconds / (60 * 60))
    } else {
        format!("{}d", seconds / (60 * 60 * 24))
    };
    format!("{age} ago")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use syncwatch_core::{JobHandle, MonitoredTable};

    fn connection(id: &str) -> ConnectionConfig {
        ConnectionConfig {
            connection_id: ConnectionId::from(id),
            description: String::new(),
            monitored_tables: vec![MonitoredTable::new("public", "orders", "updated_at")],
        }
    }

    #[test]
    fn rows_reflect_watermarks_and_active_jobs() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut state = OrchestratorState::default();
        state.advance_watermark(&ConnectionId::from("synced"), now - chrono::Duration::hours(3));
        state.set_active_job(&ConnectionId::from("busy"), JobHandle::from("42"));
        state.advance_watermark(&ConnectionId::from("removed"), now - chrono::Duration::days(2));

        let connections = vec![connection("synced"), connection("busy"), connection("fresh")];
        let rows = build_rows(&connections, &state, now);

        let phases: Vec<_> = rows
            .iter()
            .map(|r| (r.connection_id.as_str(), r.status.clone()))
            .collect();
        assert_eq!(
            phases,
            vec![
                ("synced", Phase::Idle),
                ("busy", Phase::Running),
                ("fresh", Phase::NeverSynced),
                ("removed", Phase::Unconfigured),
            ]
        );
        assert_eq!(rows[0].last_sync_age, "3h ago");
        assert_eq!(rows[1].active_job.as_deref(), Some("42"));
        assert_eq!(rows[2].last_sync_age, "never");
        assert_eq!(rows[3].last_sync_age, "2d ago");
    }

    #[test]
    fn age_is_clamped_for_future_watermarks() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let ahead = now + chrono::Duration::minutes(5);
        assert_eq!(format_age(Some(ahead), now), "0s ago");
        assert_eq!(format_age(Some(now - chrono::Duration::seconds(90)), now), "1m ago");
    }
}
