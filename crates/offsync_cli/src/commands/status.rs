//! Status command implementation.

use super::open_state;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Summary of a state directory.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// State directory path.
    pub path: String,
    /// Number of pending writes.
    pub pending: usize,
    /// Admission time of the head write.
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    /// Pending writes with at least one failed attempt.
    pub retrying: usize,
    /// Last time a drain emptied the queue.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Last completed warm-up.
    pub last_warm_up: Option<DateTime<Utc>>,
}

/// Builds the status report for `path`.
pub fn collect(path: &Path) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let state = open_state(path)?;
    let ops = state.try_load_queue()?;

    Ok(StatusReport {
        path: path.display().to_string(),
        pending: ops.len(),
        oldest_enqueued_at: ops.first().map(|op| op.enqueued_at),
        retrying: ops.iter().filter(|op| op.attempts > 0).count(),
        last_synced_at: state.try_load_timestamp(offsync_engine::LAST_SYNCED_KEY)?,
        last_warm_up: state.try_load_timestamp(offsync_engine::LAST_WARM_UP_KEY)?,
    })
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Reading sync state from {:?}", path);
    let report = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

fn print_text_output(report: &StatusReport) {
    println!("offsync State");
    println!("=============");
    println!();
    println!("Path: {}", report.path);
    println!();
    println!("Write queue:");
    println!("  Pending:   {}", report.pending);
    println!("  Retrying:  {}", report.retrying);
    println!("  Oldest:    {}", format_time(report.oldest_enqueued_at));
    println!();
    println!("Timestamps:");
    println!("  Last synced:   {}", format_time(report.last_synced_at));
    println!("  Last warm-up:  {}", format_time(report.last_warm_up));
}

pub(crate) fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_engine::{QueuedOperation, StatePersistence, WriteMethod};
    use offsync_storage::FileStore;
    use std::sync::Arc;

    #[test]
    fn status_of_seeded_directory() {
        let dir = tempfile::tempdir().unwrap();
        let synced = Utc::now();
        {
            let state = StatePersistence::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            let mut retried = QueuedOperation::new(WriteMethod::Post, "/a", None);
            retried.attempts = 2;
            let fresh = QueuedOperation::new(WriteMethod::Delete, "/b/1", None);
            state.try_save_queue(&[retried, fresh]).unwrap();
            state.set_last_synced_at(synced);

            let report = collect(dir.path());
            assert!(report.is_err(), "directory is locked while the store is open");
        }

        let report = collect(dir.path()).unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.retrying, 1);
        assert!(report.oldest_enqueued_at.is_some());
        assert_eq!(report.last_synced_at, Some(synced));
        assert_eq!(report.last_warm_up, None);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn format_time_never() {
        assert_eq!(format_time(None), "never");
    }
}
