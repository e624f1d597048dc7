//! Reset-stamps command implementation.

use super::open_state;
use offsync_engine::{LAST_SYNCED_KEY, LAST_WARM_UP_KEY};
use std::path::Path;
use tracing::info;

/// Runs the reset-stamps command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Resetting timestamps in {:?}", path);
    let state = open_state(path)?;
    state.try_save_timestamp(LAST_SYNCED_KEY, None)?;
    state.try_save_timestamp(LAST_WARM_UP_KEY, None)?;
    state.try_flush()?;
    println!("Timestamps reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use offsync_engine::StatePersistence;
    use offsync_storage::FileStore;
    use std::sync::Arc;

    #[test]
    fn clears_both_stamps() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = StatePersistence::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            state.set_last_synced_at(Utc::now());
            state.set_last_warm_up(Utc::now());
        }

        run(dir.path()).unwrap();

        let state = open_state(dir.path()).unwrap();
        assert!(state.last_synced_at().is_none());
        assert!(state.last_warm_up().is_none());
    }

    #[test]
    fn missing_stamps_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        run(dir.path()).unwrap();
    }
}
