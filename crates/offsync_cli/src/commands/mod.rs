//! CLI command implementations.

pub mod queue;
pub mod reset_stamps;
pub mod status;

use offsync_engine::StatePersistence;
use offsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Opens an existing state directory, taking its lock.
pub(crate) fn open_state(path: &Path) -> Result<StatePersistence, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No state directory found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    Ok(StatePersistence::new(Arc::new(store)))
}
