//! Queue command implementations.

use super::open_state;
use super::status::format_time;
use offsync_engine::{OperationId, QueuedOperation};
use std::path::Path;
use tracing::info;

/// Runs `queue list`.
pub fn list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ops = open_state(path)?.try_load_queue()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&ops)?);
        }
        _ => {
            if ops.is_empty() {
                println!("Queue is empty");
            }
            for (position, op) in ops.iter().enumerate() {
                println!(
                    "{:>3}  {}  {:<6} {}  attempts={}  enqueued={}",
                    position,
                    op.id,
                    op.method,
                    op.target,
                    op.attempts,
                    format_time(Some(op.enqueued_at))
                );
            }
        }
    }

    Ok(())
}

/// Removes the operation with `id` and returns it.
pub fn remove_operation(
    path: &Path,
    id: &str,
) -> Result<QueuedOperation, Box<dyn std::error::Error>> {
    let id: OperationId = id
        .parse()
        .map_err(|e| format!("Invalid operation id {:?}: {}", id, e))?;

    let state = open_state(path)?;
    let mut ops = state.try_load_queue()?;
    let index = ops
        .iter()
        .position(|op| op.id == id)
        .ok_or_else(|| format!("No pending operation {}", id))?;
    let removed = ops.remove(index);
    state.try_save_queue(&ops)?;
    state.try_flush()?;

    Ok(removed)
}

/// Removes and returns the head operation, if any.
pub fn drop_head_operation(
    path: &Path,
) -> Result<Option<QueuedOperation>, Box<dyn std::error::Error>> {
    let state = open_state(path)?;
    let mut ops = state.try_load_queue()?;
    if ops.is_empty() {
        return Ok(None);
    }
    let head = ops.remove(0);
    state.try_save_queue(&ops)?;
    state.try_flush()?;

    Ok(Some(head))
}

/// Removes every operation and returns how many there were.
pub fn clear_operations(path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let state = open_state(path)?;
    let count = state.try_load_queue()?.len();
    state.try_save_queue(&[])?;
    state.try_flush()?;

    Ok(count)
}

/// Runs `queue remove`.
pub fn remove(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let removed = remove_operation(path, id)?;
    info!("Removed {} from {:?}", removed.id, path);
    println!("Removed {} {} {}", removed.id, removed.method, removed.target);
    Ok(())
}

/// Runs `queue drop-head`.
pub fn drop_head(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match drop_head_operation(path)? {
        Some(head) => {
            info!("Dropped head {} from {:?}", head.id, path);
            println!(
                "Dropped {} {} {} (attempts={})",
                head.id, head.method, head.target, head.attempts
            );
        }
        None => println!("Queue is empty"),
    }
    Ok(())
}

/// Runs `queue clear`.
pub fn clear(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let count = clear_operations(path)?;
    info!("Cleared {} operations from {:?}", count, path);
    println!("Removed {} pending operations", count);
    Ok(())
}
